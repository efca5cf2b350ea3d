//! OAuth credentials for the Google APIs.
//!
//! - `ClientSecrets`: client id/secret read from `credentials.json`
//! - `TokenStore`: access/refresh token persisted in `token.json`
//!
//! Only the refresh grant is performed here. Obtaining the first token is
//! done out of band and the resulting `token.json` is supplied to the server.

pub mod credentials;
pub mod token;

pub use credentials::ClientSecrets;
pub use token::{RefreshResponse, TokenData, TokenStore};
