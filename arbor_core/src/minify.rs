/// Minifies `json` in place and returns the new length. Bytes past the
/// returned length are left unspecified.
///
/// Nothing is validated. String literals are copied verbatim, `//` and
/// `/* */` comments are dropped along with any other `/`, and an
/// unterminated string or comment runs to the end of the input.
pub fn minify(json: &mut [u8]) -> usize {
    let mut read = 0;
    let mut write = 0;
    while read < json.len() {
        match json[read] {
            b' ' | b'\t' | b'\r' | b'\n' => read += 1,
            b'/' => {
                read = match json.get(read + 1) {
                    Some(b'/') => skip_line_comment(json, read + 2),
                    Some(b'*') => skip_block_comment(json, read + 2),
                    _ => read + 1,
                };
            }
            b'"' => {
                let end = string_end(json, read);
                json.copy_within(read..end, write);
                write += end - read;
                read = end;
            }
            byte => {
                json[write] = byte;
                write += 1;
                read += 1;
            }
        }
    }
    write
}

/// Minifies a byte vector and truncates it to the result.
pub fn minify_vec(json: &mut Vec<u8>) {
    let len = minify(json);
    json.truncate(len);
}

/// Returns a minified copy of `json`.
pub fn minify_str(json: &str) -> String {
    let mut bytes = json.as_bytes().to_vec();
    minify_vec(&mut bytes);
    // Only ASCII bytes and whole comments are removed, so the text stays UTF-8.
    String::from_utf8(bytes)
        .unwrap_or_else(|err| String::from_utf8_lossy(err.as_bytes()).into_owned())
}

/// Position just past the newline ending the comment body starting at `from`.
fn skip_line_comment(json: &[u8], from: usize) -> usize {
    match json[from.min(json.len())..].iter().position(|&b| b == b'\n') {
        Some(offset) => from + offset + 1,
        None => json.len(),
    }
}

/// Position just past the `*/` closing the comment body starting at `from`.
fn skip_block_comment(json: &[u8], from: usize) -> usize {
    match json[from.min(json.len())..]
        .windows(2)
        .position(|pair| pair == b"*/")
    {
        Some(offset) => from + offset + 2,
        None => json.len(),
    }
}

/// Position just past the closing quote of the string literal opening at `start`.
fn string_end(json: &[u8], start: usize) -> usize {
    let mut pos = start + 1;
    while pos < json.len() {
        match json[pos] {
            b'\\' => pos += 2,
            b'"' => return pos + 1,
            _ => pos += 1,
        }
    }
    json.len()
}
