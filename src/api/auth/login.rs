use crate::api::client::join_base;
use crate::error::UploadError;
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::{debug, info};

/// 获取 bearer token 的外部协作者；编排层只关心 token 字符串与失败方式。
pub trait TokenProvider {
    fn token(&self) -> Result<String, UploadError>;
}

/// `POST {base}/oauth` 的响应体，未知字段直接忽略。
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: Option<String>,
    pub expires_in: Option<u64>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

/// 用户名/密码换取 token 的实现。
pub struct OAuthLogin {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl OAuthLogin {
    pub fn new(client: Client, base_url: &str, username: &str, password: &str) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    pub fn login(&self) -> Result<LoginResponse, UploadError> {
        let login_url = join_base(&self.base_url, "/oauth");
        debug!(url = %login_url, "requesting access token");

        let params = [
            ("username", self.username.as_str()),
            ("password", self.password.as_str()),
        ];
        let response = self
            .client
            .post(&login_url)
            .form(&params)
            .send()
            .map_err(|e| UploadError::Auth(format!("login request failed: {e}")))?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(UploadError::Auth(format!(
                "login call failed with response code {status}"
            )));
        }

        let payload: LoginResponse = response
            .json()
            .map_err(|e| UploadError::Auth(format!("failed to parse login response: {e}")))?;
        if payload.access_token.trim().is_empty() {
            return Err(UploadError::Auth(
                "missing access_token in response".to_string(),
            ));
        }

        info!(username = %self.username, "login successful");
        Ok(payload)
    }
}

impl TokenProvider for OAuthLogin {
    fn token(&self) -> Result<String, UploadError> {
        self.login().map(|payload| payload.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::{build_blocking_client, DEFAULT_TIMEOUT};
    use mockito::Matcher;

    fn login_for(server: &mockito::Server) -> OAuthLogin {
        let client = build_blocking_client(DEFAULT_TIMEOUT).unwrap();
        OAuthLogin::new(client, &server.url(), "tester", "s3cret")
    }

    #[test]
    fn login_returns_access_token() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/oauth")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("username".into(), "tester".into()),
                Matcher::UrlEncoded("password".into(), "s3cret".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"abc","token_type":"Bearer","expires_in":3600,"resource":["x"]}"#)
            .create();

        let token = login_for(&server).token().unwrap();
        assert_eq!(token, "abc");
        mock.assert();
    }

    #[test]
    fn non_200_is_auth_error() {
        let mut server = mockito::Server::new();
        let _mock = server.mock("POST", "/oauth").with_status(401).create();

        let err = login_for(&server).token().unwrap_err();
        assert!(matches!(err, UploadError::Auth(ref msg) if msg.contains("401")));
    }

    #[test]
    fn missing_token_is_auth_error() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/oauth")
            .with_status(200)
            .with_body(r#"{"token_type":"Bearer"}"#)
            .create();

        let err = login_for(&server).token().unwrap_err();
        assert!(matches!(err, UploadError::Auth(_)));
    }
}
