//! URL query string and form body parser.

use crate::MultiMap;
use memchr::memchr;

/// Query string parser for `application/x-www-form-urlencoded` data.
///
/// Tokens are separated by `&`, empty tokens are skipped. Each token is split at
/// its first `=`. Names and values are percent-decoded with `+` read as a space,
/// names are trimmed. A value is recorded only when text follows the `=`, so
/// `flag` and `flag=` both register `flag` with no values.
///
/// # Examples
/// ```rust
/// use duplex_web::query::Query;
///
/// let params = Query::parse(b"name=John+Smith&tag=a&tag=b&&debug&empty=");
///
/// assert_eq!(params.first("name"), Some("John Smith"));
/// assert_eq!(params.get_all("tag"), ["a", "b"]);
/// assert!(params.get_all("debug").is_empty());
/// assert!(params.get_all("empty").is_empty());
/// assert_eq!(params.len(), 4);
/// ```
pub struct Query;

impl Query {
    /// Parses a query string into a new [`MultiMap`].
    #[inline]
    pub fn parse(query: &[u8]) -> MultiMap {
        let mut result = MultiMap::new();
        Self::parse_into(&mut result, query);
        result
    }

    /// Parses a query string, appending to an existing [`MultiMap`].
    ///
    /// # Examples
    /// ```
    /// use duplex_web::query::Query;
    ///
    /// let mut params = Query::parse(b"a=1");
    /// Query::parse_into(&mut params, b"a=2&email=user%40example.com");
    ///
    /// assert_eq!(params.get_all("a"), ["1", "2"]);
    /// assert_eq!(params.first("email"), Some("user@example.com"));
    /// ```
    pub fn parse_into(result: &mut MultiMap, query: &[u8]) {
        let mut start = 0;
        while start < query.len() {
            let end = memchr(b'&', &query[start..])
                .map(|pos| start + pos)
                .unwrap_or(query.len());
            let token = &query[start..end];
            start = end + 1;

            if token.is_empty() {
                continue;
            }

            match memchr(b'=', token) {
                Some(index) => {
                    let name = Self::decode(&token[..index]);
                    let value = &token[index + 1..];
                    match value.is_empty() {
                        true => result.insert_empty(name.trim()),
                        false => result.append(name.trim(), Self::decode(value)),
                    }
                }
                None => result.insert_empty(Self::decode(token).trim()),
            }
        }
    }

    /// Decodes one form-encoded component: `+` becomes a space, `%XX` becomes
    /// the byte it names. Malformed escapes are kept as written and invalid
    /// UTF-8 is replaced.
    ///
    /// # Examples
    /// ```
    /// use duplex_web::query::Query;
    ///
    /// assert_eq!(Query::decode(b"a+b%2Bc"), "a b+c");
    /// assert_eq!(Query::decode(b"100%"), "100%");
    /// ```
    pub fn decode(src: &[u8]) -> String {
        let spaced: Vec<u8> = src
            .iter()
            .map(|&byte| if byte == b'+' { b' ' } else { byte })
            .collect();

        Self::decode_percent(&spaced)
    }

    // Used for request paths: unlike form decoding, `+` stays a `+`.
    #[inline]
    pub(crate) fn decode_percent(src: &[u8]) -> String {
        String::from_utf8_lossy(&urlencoding::decode_binary(src)).into_owned()
    }
}
