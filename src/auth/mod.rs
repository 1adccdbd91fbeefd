// Authentication module
// Manages token lifecycle against the API's signin/signout endpoints

mod login;
mod manager;
mod types;

pub use login::{bearer_value, extract_token};
pub use manager::TokenManager;
pub use types::{
    expiry_buffer, expiry_from, TokenData, TokenState, TokenStatus, DEFAULT_TOKEN_LIFETIME_SECS,
    EXPIRY_BUFFER_SECS, MAX_TOKEN_LIFETIME_SECS, SIGNIN_PATH, SIGNOUT_PATH, TOKEN_FIELDS,
};
