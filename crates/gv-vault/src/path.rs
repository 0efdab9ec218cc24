//! Blob path convention: `[{owner}/][{state}/{city}/]{id}.enc`

/// Lower-case and replace anything outside `[a-z0-9]` with `_`.
pub fn sanitize_label(label: &str) -> String {
    label
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '_' })
        .collect()
}

/// Location labels go into the path only when asked for: they are plaintext to the operator.
pub fn blob_path(owner: Option<&str>, location: Option<(&str, &str)>, id: &str) -> String {
    let mut path = String::new();
    if let Some(owner) = owner {
        path.push_str(&sanitize_label(owner));
        path.push('/');
    }
    if let Some((state, city)) = location {
        path.push_str(&sanitize_label(state));
        path.push('/');
        path.push_str(&sanitize_label(city));
        path.push('/');
    }
    path.push_str(id);
    path.push_str(".enc");
    path
}
