mod login;

pub use login::{LoginResponse, OAuthLogin, TokenProvider};
