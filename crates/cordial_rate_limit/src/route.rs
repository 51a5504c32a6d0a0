//! Routes and the bucket keys derived from them.

use cordial_error::{RestError, RestErrorKind};
use derive_getters::Getters;
use reqwest::Method;

/// Placeholders whose value scopes a rate limit on its own.
const MAJOR_PARAMETERS: [&str; 4] = ["channel.id", "guild.id", "webhook.id", "webhook.token"];

/// Identity of a rate-limit lane.
///
/// Derived from the route until the server names an authoritative bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("{}", _0)]
pub struct BucketKey(String);

impl BucketKey {
    /// Wrap an arbitrary key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key for a server-assigned bucket hash shared by several routes.
    pub fn from_hash(hash: &str, major: Option<&str>) -> Self {
        Self(format!("{}:{}", hash, major.unwrap_or_default()))
    }

    /// Borrow the key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// An API endpoint bound to concrete parameters.
///
/// # Examples
///
/// ```
/// use cordial_rate_limit::Route;
/// use reqwest::Method;
///
/// let route = Route::new(
///     Method::POST,
///     "/channels/{channel.id}/messages",
///     &["81384788765712384"],
/// )
/// .unwrap();
///
/// assert_eq!(route.path(), "/channels/81384788765712384/messages");
/// assert_eq!(route.major().as_deref(), Some("81384788765712384"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Getters)]
pub struct Route {
    /// HTTP method
    method: Method,
    /// Path template with `{name}` placeholders
    template: String,
    /// Complete path with placeholders filled in
    path: String,
    /// Value of the major parameter, if the template has one
    major: Option<String>,
}

impl Route {
    /// Bind `params` to the template's placeholders, in order.
    ///
    /// # Errors
    ///
    /// Returns `RestErrorKind::InvalidRoute` when the parameter count does not
    /// match the placeholder count or a placeholder is unterminated.
    pub fn new(
        method: Method,
        template: impl Into<String>,
        params: &[&str],
    ) -> Result<Self, RestError> {
        let template = template.into();
        let mut path = String::with_capacity(template.len());
        let mut major = None;
        let mut params_iter = params.iter();
        let mut rest = template.as_str();
        let mut first = true;

        while let Some(open) = rest.find('{') {
            path.push_str(&rest[..open]);
            let close = rest[open..].find('}').ok_or_else(|| {
                RestError::new(RestErrorKind::InvalidRoute(format!(
                    "unterminated placeholder in {}",
                    template
                )))
            })? + open;
            let name = &rest[open + 1..close];
            let value = params_iter.next().ok_or_else(|| {
                RestError::new(RestErrorKind::InvalidRoute(format!(
                    "missing value for {{{}}} in {}",
                    name, template
                )))
            })?;
            if first && MAJOR_PARAMETERS.contains(&name) {
                major = Some((*value).to_string());
            }
            first = false;
            path.push_str(value);
            rest = &rest[close + 1..];
        }
        path.push_str(rest);

        if params_iter.next().is_some() {
            return Err(RestError::new(RestErrorKind::InvalidRoute(format!(
                "too many parameters for {}",
                template
            ))));
        }

        Ok(Self {
            method,
            template,
            path,
            major,
        })
    }

    /// Bucket key before the server has assigned one.
    ///
    /// Different methods on the same template are limited separately.
    pub fn bucket_key(&self) -> BucketKey {
        BucketKey(format!(
            "{} {}:{}",
            self.method,
            self.template,
            self.major.as_deref().unwrap_or_default()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_major_parameter_scopes_bucket() {
        let a = Route::new(Method::GET, "/channels/{channel.id}", &["1"]).unwrap();
        let b = Route::new(Method::GET, "/channels/{channel.id}", &["2"]).unwrap();
        assert_ne!(a.bucket_key(), b.bucket_key());
    }

    #[test]
    fn test_minor_parameter_shares_bucket() {
        let a = Route::new(
            Method::DELETE,
            "/channels/{channel.id}/messages/{message.id}",
            &["1", "10"],
        )
        .unwrap();
        let b = Route::new(
            Method::DELETE,
            "/channels/{channel.id}/messages/{message.id}",
            &["1", "11"],
        )
        .unwrap();
        assert_eq!(a.bucket_key(), b.bucket_key());
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn test_method_scopes_bucket() {
        let get = Route::new(Method::GET, "/guilds/{guild.id}", &["5"]).unwrap();
        let patch = Route::new(Method::PATCH, "/guilds/{guild.id}", &["5"]).unwrap();
        assert_ne!(get.bucket_key(), patch.bucket_key());
    }

    #[test]
    fn test_non_major_first_parameter() {
        let route = Route::new(Method::GET, "/users/{user.id}", &["7"]).unwrap();
        assert_eq!(route.major(), &None);
        assert_eq!(route.path(), "/users/7");
    }

    #[test]
    fn test_parameter_count_mismatch() {
        assert!(Route::new(Method::GET, "/channels/{channel.id}", &[]).is_err());
        assert!(Route::new(Method::GET, "/gateway/bot", &["1"]).is_err());
        assert!(Route::new(Method::GET, "/channels/{channel.id", &["1"]).is_err());
    }
}
