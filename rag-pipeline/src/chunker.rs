use common::error::AppError;

pub const DEFAULT_CHUNK_SIZE: usize = 800;
pub const DEFAULT_OVERLAP: usize = 120;

/// Splits `text` into windows of `chunk_size` characters where adjacent
/// windows share `overlap` characters. The final chunk is truncated to
/// whatever remains; once a window reaches the end of the text no further
/// chunk is emitted. Deterministic, and counted in characters, not bytes
/// or tokens.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<String>, AppError> {
    if chunk_size == 0 {
        return Err(AppError::Validation(
            "chunk_size must be greater than zero".to_string(),
        ));
    }
    if overlap >= chunk_size {
        return Err(AppError::Validation(format!(
            "overlap {overlap} must be smaller than chunk_size {chunk_size}"
        )));
    }

    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = usize::min(start + chunk_size, chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += chunk_size - overlap;
    }

    Ok(chunks)
}
