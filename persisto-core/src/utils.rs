/// Escapes a string into a single, safe path segment.
///
/// ASCII letters, digits, `_` and `-` are kept; every other byte is written
/// as `%XX`. The mapping is reversible, so distinct identifiers never share
/// a file, and the result can neither climb out of its directory (`..`) nor
/// hide as a dotfile. An empty input becomes `%`, which no escape produces.
///
/// # Examples
///
/// ```
/// use persisto_core::utils::escape_path_segment;
///
/// assert_eq!(escape_path_segment("2_to_the_power_of_4"), "2_to_the_power_of_4");
/// assert_eq!(escape_path_segment("../etc/passwd"), "%2E%2E%2Fetc%2Fpasswd");
/// assert_eq!(escape_path_segment("x=1.5"), "x%3D1%2E5");
/// assert_eq!(escape_path_segment(""), "%");
/// ```
pub fn escape_path_segment(s: &str) -> String {
    if s.is_empty() {
        return "%".to_string();
    }
    let mut escaped = String::with_capacity(s.len());
    for byte in s.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            escaped.push(char::from(byte));
        } else {
            escaped.push_str(&format!("%{byte:02X}"));
        }
    }
    escaped
}

/// Makes a function name usable as a remote collection name.
///
/// Collections are addressed as a single URL segment restricted to word
/// characters, so everything else becomes `_`.
///
/// # Examples
///
/// ```
/// use persisto_core::utils::collection_name;
///
/// assert_eq!(collection_name("power"), "power");
/// assert_eq!(collection_name("Matrix::det"), "Matrix__det");
/// ```
pub fn collection_name(s: &str) -> String {
    if s.is_empty() {
        return "_".to_string();
    }
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Shortens response bodies quoted in error messages.
pub(crate) fn truncate_message(body: &str, max: usize) -> String {
    if body.chars().count() <= max {
        body.to_string()
    } else {
        let mut short: String = body.chars().take(max).collect();
        short.push('…');
        short
    }
}
