pub mod auth_service;
pub mod cleanup;
pub mod image_service;
pub mod oauth_service;
pub mod token_service;
pub mod user_service;
pub mod verification_service;
