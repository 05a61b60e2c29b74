//! Browser cookie import for cookie-authenticated web probes.
//!
//! ## Supported Browsers
//!
//! - **Safari**: `Cookies.binarycookies` (macOS only, no encryption)
//! - **Chrome**: SQLite `Cookies` database, `v10`/`v11` values decrypted with
//!   the "Chrome Safe Storage" key
//!
//! Sources are tried in [`Browser::import_order`]. This module only reads
//! cookies for the domain a probe asks for; deciding which account a set of
//! cookies belongs to happens in [`crate::host::web_session`].

use std::fs;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace, warn};

use crate::error::BrowserError;
use crate::host::keychain::KeychainCache;

/// Seconds between the Unix epoch and 2001-01-01 (Mac absolute time).
const MAC_EPOCH_OFFSET_SECS: f64 = 978_307_200.0;

/// Microseconds between 1601-01-01 (Windows epoch) and the Unix epoch.
const WINDOWS_EPOCH_OFFSET_MICROS: i64 = 11_644_473_600_000_000;

/// PBKDF2 salt used by Chromium's cookie encryption.
const CHROME_SALT: &[u8] = b"saltysalt";

/// Length of the SHA-256 domain digest newer Chrome builds prepend to values.
const CHROME_DOMAIN_DIGEST_LEN: usize = 32;

// ============================================================================
// Browser Enum
// ============================================================================

/// Browsers cookies can be imported from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Browser {
    /// Apple Safari (macOS only).
    Safari,
    /// Google Chrome.
    Chrome,
}

impl Browser {
    /// Returns the display name for this browser.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Safari => "Safari",
            Self::Chrome => "Chrome",
        }
    }

    /// Order in which cookie sources are consulted.
    pub fn import_order() -> &'static [Browser] {
        &[Self::Safari, Self::Chrome]
    }

    /// Returns the cookie store location on this platform.
    pub fn cookie_db_path(&self) -> Option<PathBuf> {
        let home = dirs::home_dir()?;
        match self {
            Self::Safari => {
                if !cfg!(target_os = "macos") {
                    return None;
                }
                let sandboxed = home
                    .join("Library/Containers/com.apple.Safari/Data/Library/Cookies/Cookies.binarycookies");
                if sandboxed.exists() {
                    Some(sandboxed)
                } else {
                    Some(home.join("Library/Cookies/Cookies.binarycookies"))
                }
            }
            Self::Chrome => {
                if cfg!(target_os = "macos") {
                    Some(home.join("Library/Application Support/Google/Chrome/Default/Cookies"))
                } else if cfg!(target_os = "linux") {
                    Some(home.join(".config/google-chrome/Default/Cookies"))
                } else {
                    None
                }
            }
        }
    }
}

impl std::fmt::Display for Browser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

// ============================================================================
// Cookie
// ============================================================================

/// A browser cookie.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: String,
    /// Domain the cookie belongs to.
    pub domain: String,
    /// Path the cookie is valid for.
    pub path: String,
    /// Expiration time.
    pub expires: Option<DateTime<Utc>>,
    /// Whether the cookie requires HTTPS.
    pub secure: bool,
    /// Whether the cookie is HTTP-only.
    pub http_only: bool,
}

impl std::fmt::Debug for Cookie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cookie")
            .field("name", &self.name)
            .field("value", &format_args!("<{} bytes>", self.value.len()))
            .field("domain", &self.domain)
            .field("expires", &self.expires)
            .finish_non_exhaustive()
    }
}

impl Cookie {
    /// Returns true if the cookie is expired.
    pub fn is_expired(&self) -> bool {
        self.expires.is_some_and(|exp| exp < Utc::now())
    }

    /// Returns true if this cookie is sent to `domain`.
    pub fn matches_domain(&self, domain: &str) -> bool {
        let cookie_domain = self.domain.trim_start_matches('.');
        domain == cookie_domain || domain.ends_with(&format!(".{cookie_domain}"))
    }
}

/// Joins cookies into a `Cookie:` header value.
pub fn cookie_header(cookies: &[Cookie]) -> String {
    cookies
        .iter()
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// Browser Cookie Importer
// ============================================================================

/// Reads cookies out of browser cookie stores.
#[derive(Debug, Clone)]
pub struct BrowserCookieImporter {
    keychain: KeychainCache,
    overrides: Vec<(Browser, PathBuf)>,
}

impl BrowserCookieImporter {
    /// Creates an importer. `keychain` must address external entries
    /// (see [`crate::host::keychain::SystemKeychain::external`]).
    pub fn new(keychain: KeychainCache) -> Self {
        Self {
            keychain,
            overrides: Vec::new(),
        }
    }

    /// Reads `browser` cookies from `path` instead of the platform default.
    pub fn with_store_path(mut self, browser: Browser, path: impl Into<PathBuf>) -> Self {
        self.overrides.retain(|(b, _)| *b != browser);
        self.overrides.push((browser, path.into()));
        self
    }

    fn store_path(&self, browser: Browser) -> Option<PathBuf> {
        self.overrides
            .iter()
            .find(|(b, _)| *b == browser)
            .map(|(_, path)| path.clone())
            .or_else(|| browser.cookie_db_path())
    }

    /// Imports unexpired cookies for `domain` from one browser.
    #[instrument(skip(self), fields(browser = %browser, domain = %domain))]
    pub async fn import(&self, browser: Browser, domain: &str) -> Result<Vec<Cookie>, BrowserError> {
        let path = self
            .store_path(browser)
            .ok_or_else(|| BrowserError::Unsupported(browser.display_name().to_string()))?;

        if !path.exists() {
            return Err(BrowserError::DatabaseNotFound {
                browser: browser.display_name().to_string(),
                path: path.display().to_string(),
            });
        }

        let key = match browser {
            Browser::Chrome => Some(self.chrome_key().await?),
            Browser::Safari => None,
        };

        let owned_domain = domain.to_string();
        let cookies = tokio::task::spawn_blocking(move || match key {
            Some(key) => read_chrome_cookies(&path, &owned_domain, &key),
            None => read_safari_cookies(&path, &owned_domain),
        })
        .await
        .map_err(|e| BrowserError::ReadFailed(e.to_string()))??;

        let cookies: Vec<Cookie> = cookies
            .into_iter()
            .filter(|c| !c.is_expired() && c.matches_domain(domain))
            .collect();

        if cookies.is_empty() {
            return Err(BrowserError::NoCookiesFound(domain.to_string()));
        }

        debug!(count = cookies.len(), "Cookies imported");
        Ok(cookies)
    }

    /// Imports cookies from every browser in import order, skipping
    /// browsers that have none.
    pub async fn candidates(&self, domain: &str) -> Vec<(Browser, Vec<Cookie>)> {
        let mut found = Vec::new();
        for browser in Browser::import_order() {
            match self.import(*browser, domain).await {
                Ok(cookies) => found.push((*browser, cookies)),
                Err(e) => trace!(browser = %browser, error = %e, "Browser skipped"),
            }
        }
        found
    }

    async fn chrome_key(&self) -> Result<[u8; 16], BrowserError> {
        if cfg!(target_os = "macos") {
            let password = self
                .keychain
                .get("Chrome Safe Storage", "Chrome")
                .await
                .map_err(|e| BrowserError::DecryptionFailed(e.to_string()))?
                .ok_or_else(|| {
                    BrowserError::DecryptionFailed("no Chrome Safe Storage entry".to_string())
                })?;
            Ok(derive_chrome_key(password.as_bytes(), 1003))
        } else {
            // Linux without a keyring integration uses a fixed password.
            Ok(derive_chrome_key(b"peanuts", 1))
        }
    }
}

// ============================================================================
// Safari
// ============================================================================

fn read_safari_cookies(path: &Path, domain: &str) -> Result<Vec<Cookie>, BrowserError> {
    debug!(path = %path.display(), "Reading Safari cookies");
    let data = fs::read(path)?;
    let cookies = parse_binary_cookies(&data)?;
    Ok(cookies
        .into_iter()
        .filter(|c| c.matches_domain(domain))
        .collect())
}

/// Little helper for the fixed-width fields of `Cookies.binarycookies`.
struct ByteReader<'a> {
    data: &'a [u8],
}

impl<'a> ByteReader<'a> {
    fn slice(&self, offset: usize, len: usize) -> Result<&'a [u8], BrowserError> {
        offset
            .checked_add(len)
            .and_then(|end| self.data.get(offset..end))
            .ok_or_else(|| BrowserError::ReadFailed("truncated binarycookies file".to_string()))
    }

    fn u32_be(&self, offset: usize) -> Result<u32, BrowserError> {
        let bytes = self.slice(offset, 4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn u32_le(&self, offset: usize) -> Result<u32, BrowserError> {
        let bytes = self.slice(offset, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn f64_le(&self, offset: usize) -> Result<f64, BrowserError> {
        let bytes = self.slice(offset, 8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(buf))
    }

    fn c_string(&self, offset: usize) -> Result<String, BrowserError> {
        let tail = self
            .data
            .get(offset..)
            .ok_or_else(|| BrowserError::ReadFailed("string offset out of range".to_string()))?;
        let end = tail.iter().position(|b| *b == 0).unwrap_or(tail.len());
        Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
    }
}

/// Parses Safari's `Cookies.binarycookies` format.
pub fn parse_binary_cookies(data: &[u8]) -> Result<Vec<Cookie>, BrowserError> {
    let file = ByteReader { data };
    if file.slice(0, 4)? != b"cook" {
        return Err(BrowserError::ReadFailed("not a binarycookies file".to_string()));
    }

    let page_count = file.u32_be(4)? as usize;
    let mut page_offset = 8 + page_count * 4;
    let mut cookies = Vec::new();

    for page_index in 0..page_count {
        let page_size = file.u32_be(8 + page_index * 4)? as usize;
        let page = ByteReader {
            data: file.slice(page_offset, page_size)?,
        };
        page_offset += page_size;

        let cookie_count = page.u32_le(4)? as usize;
        for cookie_index in 0..cookie_count {
            let start = page.u32_le(8 + cookie_index * 4)? as usize;
            let size = page.u32_le(start)? as usize;
            let record = ByteReader {
                data: page.slice(start, size)?,
            };
            match parse_binary_cookie(&record) {
                Ok(cookie) => cookies.push(cookie),
                Err(e) => trace!(error = %e, "Skipping malformed Safari cookie"),
            }
        }
    }

    Ok(cookies)
}

fn parse_binary_cookie(record: &ByteReader<'_>) -> Result<Cookie, BrowserError> {
    let flags = record.u32_le(8)?;
    let domain = record.c_string(record.u32_le(16)? as usize)?;
    let name = record.c_string(record.u32_le(20)? as usize)?;
    let path = record.c_string(record.u32_le(24)? as usize)?;
    let value = record.c_string(record.u32_le(28)? as usize)?;
    let expiry = record.f64_le(40)?;

    #[allow(clippy::cast_possible_truncation)]
    let expires = (expiry > 0.0)
        .then(|| Utc.timestamp_opt((expiry + MAC_EPOCH_OFFSET_SECS) as i64, 0).single())
        .flatten();

    Ok(Cookie {
        name,
        value,
        domain,
        path,
        expires,
        secure: flags & 0x1 != 0,
        http_only: flags & 0x4 != 0,
    })
}

// ============================================================================
// Chrome
// ============================================================================

fn read_chrome_cookies(path: &Path, domain: &str, key: &[u8; 16]) -> Result<Vec<Cookie>, BrowserError> {
    debug!(path = %path.display(), "Reading Chrome cookies");

    // Chrome holds a lock on the live database.
    let snapshot = tempfile::NamedTempFile::new()?;
    fs::copy(path, snapshot.path())?;

    let conn = Connection::open_with_flags(snapshot.path(), OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let mut stmt = conn.prepare(
        "SELECT name, value, encrypted_value, host_key, path, expires_utc, is_secure, is_httponly
         FROM cookies
         WHERE host_key = ?1 OR host_key LIKE ?2",
    )?;

    let rows = stmt
        .query_map([domain.to_string(), format!("%.{domain}")], |row| {
            Ok(ChromeRow {
                name: row.get(0)?,
                value: row.get(1)?,
                encrypted_value: row.get(2)?,
                host_key: row.get(3)?,
                path: row.get(4)?,
                expires_utc: row.get(5)?,
                is_secure: row.get(6)?,
                is_httponly: row.get(7)?,
            })
        })?
        .filter_map(Result::ok)
        .collect::<Vec<_>>();

    let mut cookies = Vec::with_capacity(rows.len());
    for row in rows {
        let value = if !row.value.is_empty() {
            row.value
        } else if !row.encrypted_value.is_empty() {
            match decrypt_chrome_value(&row.encrypted_value, key) {
                Ok(value) => value,
                Err(e) => {
                    trace!(name = %row.name, error = %e, "Failed to decrypt cookie, skipping");
                    continue;
                }
            }
        } else {
            continue;
        };

        cookies.push(Cookie {
            name: row.name,
            value,
            domain: row.host_key,
            path: row.path,
            expires: chrome_expiry(row.expires_utc),
            secure: row.is_secure != 0,
            http_only: row.is_httponly != 0,
        });
    }

    Ok(cookies)
}

struct ChromeRow {
    name: String,
    value: String,
    encrypted_value: Vec<u8>,
    host_key: String,
    path: String,
    expires_utc: i64,
    is_secure: i32,
    is_httponly: i32,
}

/// Converts Chrome's microseconds-since-1601 timestamp.
fn chrome_expiry(expires_utc: i64) -> Option<DateTime<Utc>> {
    if expires_utc <= 0 {
        return None;
    }
    let unix_secs = (expires_utc - WINDOWS_EPOCH_OFFSET_MICROS) / 1_000_000;
    Utc.timestamp_opt(unix_secs, 0).single()
}

fn derive_chrome_key(password: &[u8], iterations: u32) -> [u8; 16] {
    let mut key = [0u8; 16];
    let iterations = NonZeroU32::new(iterations).unwrap_or(NonZeroU32::MIN);
    ring::pbkdf2::derive(
        ring::pbkdf2::PBKDF2_HMAC_SHA1,
        iterations,
        CHROME_SALT,
        password,
        &mut key,
    );
    key
}

fn decrypt_chrome_value(encrypted: &[u8], key: &[u8; 16]) -> Result<String, BrowserError> {
    let (version, ciphertext) = encrypted
        .split_at_checked(3)
        .ok_or_else(|| BrowserError::DecryptionFailed("value too short".to_string()))?;
    if version != b"v10" && version != b"v11" {
        return Err(BrowserError::DecryptionFailed(format!(
            "unknown encryption version {:?}",
            String::from_utf8_lossy(version)
        )));
    }

    let plaintext = decrypt_aes_128_cbc(key, &[b' '; 16], ciphertext)?;
    match String::from_utf8(plaintext) {
        Ok(value) => Ok(value),
        Err(e) => {
            let bytes = e.into_bytes();
            // Newer builds prefix the value with a digest of the host.
            bytes
                .get(CHROME_DOMAIN_DIGEST_LEN..)
                .and_then(|rest| String::from_utf8(rest.to_vec()).ok())
                .ok_or_else(|| BrowserError::DecryptionFailed("value is not UTF-8".to_string()))
        }
    }
}

/// AES-128-CBC with PKCS#7 padding through the system `openssl`.
///
/// Key material goes through the environment, never the argument list.
fn decrypt_aes_128_cbc(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>, BrowserError> {
    use std::io::Write;
    use std::process::{Command, Stdio};

    let mut child = Command::new("sh")
        .arg("-c")
        .arg("openssl enc -d -aes-128-cbc -K \"$USAGEBAR_KEY\" -iv \"$USAGEBAR_IV\"")
        .env("USAGEBAR_KEY", hex_encode(key))
        .env("USAGEBAR_IV", hex_encode(iv))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(data)?;
    }

    let output = child.wait_with_output()?;
    if output.status.success() {
        Ok(output.stdout)
    } else {
        warn!("openssl refused to decrypt cookie value");
        Err(BrowserError::DecryptionFailed("openssl exited with an error".to_string()))
    }
}

fn hex_encode(data: &[u8]) -> String {
    use std::fmt::Write;
    data.iter().fold(String::with_capacity(data.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

// ============================================================================
// Tests
// ============================================================================
