/// Steam library support: detects install paths and reads app manifests.
///
/// App manifests (`steamapps/appmanifest_<id>.acf`) use Valve's KeyValues
/// text format:
///
/// ```text
/// "AppState"
/// {
///     "appid"      "1234"
///     "name"       "Bar: The Game"
///     "installdir" "Bar"
/// }
/// ```
use std::path::Path;
use tracing::{debug, trace};

use crate::catalog::normalize_path;

/// Path marker shared by every Steam library install directory.
pub const LIBRARY_MARKER: &str = "/steamapps/common/";

const MANIFEST_EXTENSION: &str = "acf";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    Section(KeyValues),
}

/// An ordered list of key/value pairs. Keys are matched case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValues {
    pairs: Vec<(String, Value)>,
}

impl KeyValues {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.pairs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            Value::Str(s) => Some(s),
            Value::Section(_) => None,
        }
    }

    pub fn section(&self, key: &str) -> Option<&KeyValues> {
        match self.get(key)? {
            Value::Section(kv) => Some(kv),
            Value::Str(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unterminated string starting at byte {0}")]
    UnterminatedString(usize),
    #[error("unexpected '{0}' at byte {1}")]
    UnexpectedToken(char, usize),
    #[error("missing value for key '{0}'")]
    MissingValue(String),
    #[error("unclosed section")]
    UnclosedSection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Str(String),
    Open,
    Close,
}

fn tokenize(text: &str) -> Result<Vec<(Token, usize)>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '/' => {
                chars.next();
                if matches!(chars.peek(), Some(&(_, '/'))) {
                    while let Some(&(_, c)) = chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        chars.next();
                    }
                } else {
                    return Err(ParseError::UnexpectedToken('/', pos));
                }
            }
            '{' => {
                chars.next();
                tokens.push((Token::Open, pos));
            }
            '}' => {
                chars.next();
                tokens.push((Token::Close, pos));
            }
            '"' => {
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some((_, 'n')) => value.push('\n'),
                            Some((_, 't')) => value.push('\t'),
                            Some((_, other)) => value.push(other),
                            None => break,
                        },
                        c => value.push(c),
                    }
                }
                if !closed {
                    return Err(ParseError::UnterminatedString(pos));
                }
                tokens.push((Token::Str(value), pos));
            }
            // Platform conditionals such as [$WIN32] carry no data we use.
            '[' => {
                for (_, c) in chars.by_ref() {
                    if c == ']' {
                        break;
                    }
                }
            }
            _ => {
                let mut value = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '{' | '}' | '"') {
                        break;
                    }
                    value.push(c);
                    chars.next();
                }
                tokens.push((Token::Str(value), pos));
            }
        }
    }
    Ok(tokens)
}

/// Parses a KeyValues document.
pub fn parse(text: &str) -> Result<KeyValues, ParseError> {
    let tokens = tokenize(text)?;
    let mut iter = tokens.into_iter();
    let root = parse_pairs(&mut iter, false)?;
    Ok(root)
}

fn parse_pairs(
    iter: &mut impl Iterator<Item = (Token, usize)>,
    nested: bool,
) -> Result<KeyValues, ParseError> {
    let mut kv = KeyValues::default();
    loop {
        let key = match iter.next() {
            Some((Token::Str(key), _)) => key,
            Some((Token::Close, pos)) => {
                if nested {
                    return Ok(kv);
                }
                return Err(ParseError::UnexpectedToken('}', pos));
            }
            Some((Token::Open, pos)) => return Err(ParseError::UnexpectedToken('{', pos)),
            None => {
                if nested {
                    return Err(ParseError::UnclosedSection);
                }
                return Ok(kv);
            }
        };
        let value = match iter.next() {
            Some((Token::Str(value), _)) => Value::Str(value),
            Some((Token::Open, _)) => Value::Section(parse_pairs(iter, true)?),
            Some((Token::Close, _)) | None => return Err(ParseError::MissingValue(key)),
        };
        kv.pairs.push((key, value));
    }
}

/// True when `exe_path` sits inside a Steam library install directory.
pub fn is_library_path(exe_path: &str) -> bool {
    normalize_path(exe_path).contains(LIBRARY_MARKER)
}

/// Looks up the Steam display name for an executable installed under
/// `<library>/steamapps/common/<installdir>/...` by scanning the library's
/// app manifests for a matching `installdir`.
pub fn app_name_for(exe_path: &str) -> Option<String> {
    let normalized = exe_path.replace('\\', "/");
    // ASCII lower-casing keeps byte offsets aligned with `normalized`.
    let idx = normalized.to_ascii_lowercase().find(LIBRARY_MARKER)?;
    let steamapps_dir = &normalized[..idx + "/steamapps".len()];
    let install_dir = normalized[idx + LIBRARY_MARKER.len()..]
        .split('/')
        .next()
        .filter(|s| !s.is_empty())?;

    let entries = match std::fs::read_dir(steamapps_dir) {
        Ok(entries) => entries,
        Err(err) => {
            debug!(%steamapps_dir, %err, "cannot read steam library");
            return None;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let is_manifest = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(MANIFEST_EXTENSION));
        if !is_manifest {
            continue;
        }
        if let Some(name) = manifest_name_for(&path, install_dir) {
            return Some(name);
        }
    }
    None
}

fn manifest_name_for(path: &Path, install_dir: &str) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    let doc = match parse(&text) {
        Ok(doc) => doc,
        Err(err) => {
            trace!(path = %path.display(), %err, "skipping unparsable manifest");
            return None;
        }
    };
    let app = doc.section("AppState")?;
    if !app.get_str("installdir")?.eq_ignore_ascii_case(install_dir) {
        return None;
    }
    app.get_str("name")
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}
