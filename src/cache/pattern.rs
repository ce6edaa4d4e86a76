//! Key and Pattern Utilities
//!
//! One glob language shared by every backend, matching what Redis `SCAN MATCH`
//! understands:
//!
//! - `*` any run of bytes (including empty)
//! - `?` exactly one byte
//! - `[abc]`, `[a-z]`, `[^a]` / `[!a]` byte classes
//! - `\x` the literal byte `x`

// == Key Prefixing ==
/// Namespaces a logical key under a backend prefix.
pub fn prefixed_key(prefix: &str, key: &str) -> String {
    let mut full = String::with_capacity(prefix.len() + key.len());
    full.push_str(prefix);
    full.push_str(key);
    full
}

/// Escapes glob metacharacters so `text` matches only itself.
pub fn escape_glob(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

// == Glob Match ==
/// Returns true if `text` matches the glob `pattern` in full.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p = pattern.as_bytes();
    let t = text.as_bytes();

    let mut pi = 0;
    let mut ti = 0;
    // Position after the last `*` and the text index it is currently absorbing up to.
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        let advanced = if pi < p.len() {
            match p[pi] {
                b'*' => {
                    star = Some((pi + 1, ti));
                    pi += 1;
                    continue;
                }
                b'?' => Some(pi + 1),
                b'[' => match match_class(p, pi, t[ti]) {
                    Some((true, end)) => Some(end),
                    Some((false, _)) => None,
                    None => (t[ti] == b'[').then_some(pi + 1),
                },
                b'\\' if pi + 1 < p.len() => (p[pi + 1] == t[ti]).then_some(pi + 2),
                literal => (literal == t[ti]).then_some(pi + 1),
            }
        } else {
            None
        };

        match advanced {
            Some(next) => {
                pi = next;
                ti += 1;
            }
            None => match star {
                Some((after_star, absorbed)) => {
                    pi = after_star;
                    ti = absorbed + 1;
                    star = Some((after_star, absorbed + 1));
                }
                None => return false,
            },
        }
    }

    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}

/// Evaluates the class starting at `p[start] == '['` against `c`.
///
/// Returns `(matched, index after ']')`, or None when the class is unterminated
/// and the `[` should be taken literally.
fn match_class(p: &[u8], start: usize, c: u8) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = i < p.len() && (p[i] == b'^' || p[i] == b'!');
    if negate {
        i += 1;
    }

    let mut matched = false;
    while i < p.len() && p[i] != b']' {
        if p[i] == b'\\' && i + 1 < p.len() {
            matched |= p[i + 1] == c;
            i += 2;
        } else if i + 2 < p.len() && p[i + 1] == b'-' && p[i + 2] != b']' {
            let (lo, hi) = if p[i] <= p[i + 2] {
                (p[i], p[i + 2])
            } else {
                (p[i + 2], p[i])
            };
            matched |= lo <= c && c <= hi;
            i += 3;
        } else {
            matched |= p[i] == c;
            i += 1;
        }
    }

    if i >= p.len() {
        return None;
    }
    Some((matched != negate, i + 1))
}
