//! Pattern matching for assertion roles, actions and resources.
//!
//! Policy assertions carry glob fragments. Each fragment compiles into the
//! cheapest variant that decides it:
//!
//! - `*` alone matches everything;
//! - a fragment without `*` or `?` is literal equality;
//! - a fragment whose only wildcard is a single trailing `*` is a prefix
//!   match;
//! - anything else becomes an anchored regex (`*` → `.*`, `?` → `.`).
//!
//! A fragment like `(a|b)` contains neither `*` nor `?` and therefore
//! classifies as literal equality, where it can never match `a` or `b`.
//! That is the established classification rule, not an accident; callers
//! that want alternation must include a wildcard.

#[derive(Debug, Clone)]
pub enum MatchObject {
    /// Source pattern was exactly `*`.
    All,
    /// Literal equality.
    Equal(String),
    /// Prefix match; source pattern ended in a single `*`.
    StartsWith(String),
    /// Anchored regex compiled from the glob fragment.
    Regex(regex::Regex),
    /// Compilation of the glob's regex failed; matches nothing.
    Never,
}

impl MatchObject {
    /// Classify and compile a glob fragment.
    pub fn compile(pattern: &str) -> MatchObject {
        if pattern == "*" {
            return MatchObject::All;
        }
        let any = pattern.find('*');
        let single = pattern.find('?');
        match (any, single) {
            (None, None) => MatchObject::Equal(pattern.to_string()),
            (Some(pos), None) if pos == pattern.len() - 1 => {
                MatchObject::StartsWith(pattern[..pos].to_string())
            }
            _ => match regex::Regex::new(&glob_to_regex(pattern)) {
                Ok(re) => MatchObject::Regex(re),
                Err(e) => {
                    tracing::error!(pattern, error = %e, "unable to compile match pattern");
                    MatchObject::Never
                }
            },
        }
    }

    /// Test an input string against the compiled pattern.
    pub fn matches(&self, input: &str) -> bool {
        match self {
            MatchObject::All => true,
            MatchObject::Equal(value) => value == input,
            MatchObject::StartsWith(prefix) => input.starts_with(prefix),
            MatchObject::Regex(re) => re.is_match(input),
            MatchObject::Never => false,
        }
    }

    /// Whether this matcher is literal equality. Assertions whose role
    /// matcher is literal go into the standard-role tables; every other
    /// variant is a wildcard role.
    pub fn is_equality(&self) -> bool {
        matches!(self, MatchObject::Equal(_))
    }
}

/// Rewrite a glob fragment as an anchored regex. `*` and `?` become `.*`
/// and `.`; the regex metacharacters `^ $ . \` are escaped; everything else
/// (including `( ) [ ] |`) passes through and keeps its regex meaning.
fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '^' | '$' | '.' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out.push('$');
    out
}
