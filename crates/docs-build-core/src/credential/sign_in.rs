//! OAuth-style browser sign-in: URL construction and callback parsing.
//!
//! Both providers follow the same shape. The build service authenticates
//! the user with the provider and redirects to
//! `<scheme>://docs-build/<provider>-authenticate?id=..&name=..&email=..&X-OP-BuildUserToken=..`,
//! which the host hands to [`super::CallbackHub`].

use docs_build_domain::{DocsError, DocsRepoType, DocsResult, UserInfo, BUILD_USER_TOKEN_HEADER};
use url::Url;

/// Callback URI the build service redirects to after signing in.
pub fn callback_uri(scheme: &str, provider: DocsRepoType) -> DocsResult<Url> {
    let raw = format!(
        "{scheme}://docs-build/{}-authenticate",
        provider.provider_path()
    );
    Url::parse(&raw).map_err(|e| DocsError::SignInFailed {
        provider,
        message: format!("invalid callback URI {raw}: {e}"),
    })
}

/// Page that starts the provider's sign-in flow.
pub fn sign_in_url(api_base_url: &str, provider: DocsRepoType, callback: &Url) -> DocsResult<Url> {
    let raw = format!(
        "{}/v1/Authenticate/{}",
        api_base_url.trim_end_matches('/'),
        provider.provider_path()
    );
    let mut url = Url::parse(&raw).map_err(|e| DocsError::SignInFailed {
        provider,
        message: format!("invalid sign-in URL {raw}: {e}"),
    })?;
    url.query_pairs_mut()
        .append_pair("redirect_uri", callback.as_str());
    Ok(url)
}

/// Extract the signed-in identity from the callback query.
pub fn parse_callback(uri: &Url, provider: DocsRepoType) -> DocsResult<UserInfo> {
    let mut id = None;
    let mut name = None;
    let mut email = None;
    let mut token = None;
    for (key, value) in uri.query_pairs() {
        match key.as_ref() {
            "id" => id = Some(value.into_owned()),
            "name" => name = Some(value.into_owned()),
            "email" => email = Some(value.into_owned()),
            k if k.eq_ignore_ascii_case(BUILD_USER_TOKEN_HEADER) => {
                token = Some(value.into_owned())
            }
            _ => {}
        }
    }

    let missing = |field: &str| DocsError::SignInFailed {
        provider,
        message: format!("sign-in callback is missing '{field}'"),
    };
    let user_token = token.filter(|t| !t.is_empty()).ok_or_else(|| missing(BUILD_USER_TOKEN_HEADER))?;
    let user_id = id.filter(|i| !i.is_empty()).ok_or_else(|| missing("id"))?;

    Ok(UserInfo {
        user_id,
        user_name: name.unwrap_or_default(),
        user_email: email.unwrap_or_default(),
        user_token,
        sign_type: provider,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_uri_per_provider() {
        let uri = callback_uri("vscode", DocsRepoType::AzureDevOps).unwrap();
        assert_eq!(uri.as_str(), "vscode://docs-build/azuredevops-authenticate");
    }

    #[test]
    fn test_sign_in_url_carries_redirect() {
        let callback = callback_uri("docs-build", DocsRepoType::GitHub).unwrap();
        let url = sign_in_url(
            "https://op-build-prod.azurewebsites.net/",
            DocsRepoType::GitHub,
            &callback,
        )
        .unwrap();
        assert!(url
            .as_str()
            .starts_with("https://op-build-prod.azurewebsites.net/v1/Authenticate/github?"));
        let redirect = url
            .query_pairs()
            .find(|(k, _)| k == "redirect_uri")
            .map(|(_, v)| v.into_owned());
        assert_eq!(redirect.as_deref(), Some(callback.as_str()));
    }

    #[test]
    fn test_parse_callback() {
        let uri = Url::parse(
            "docs-build://docs-build/github-authenticate?id=7&name=Octo%20Cat&email=o%40example.com&X-OP-BuildUserToken=tok",
        )
        .unwrap();
        let user = parse_callback(&uri, DocsRepoType::GitHub).unwrap();
        assert_eq!(user.user_id, "7");
        assert_eq!(user.user_name, "Octo Cat");
        assert_eq!(user.user_email, "o@example.com");
        assert_eq!(user.user_token, "tok");
        assert_eq!(user.sign_type, DocsRepoType::GitHub);
    }

    #[test]
    fn test_parse_callback_without_token_fails() {
        let uri = Url::parse("docs-build://docs-build/github-authenticate?id=7&name=x").unwrap();
        let err = parse_callback(&uri, DocsRepoType::GitHub).unwrap_err();
        assert!(err.to_string().contains(BUILD_USER_TOKEN_HEADER));
        assert_eq!(err.code(), docs_build_domain::ErrorCode::GitHubSignInFailed);
    }
}
