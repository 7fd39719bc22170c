//! Avatar blob storage: opaque PNG bytes under `avatars/user_{id}.png`,
//! transported as base64 strings and echoed back verbatim.

use std::io;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

pub fn avatar_file_name(user_id: i64) -> String {
    format!("user_{user_id}.png")
}

/// Decode and persist an uploaded avatar; returns the stored file name.
pub fn store_avatar(dir: &Path, user_id: i64, avatar_b64: &str) -> io::Result<String> {
    let bytes = BASE64
        .decode(avatar_b64)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    std::fs::create_dir_all(dir)?;
    let name = avatar_file_name(user_id);
    std::fs::write(dir.join(&name), bytes)?;
    Ok(name)
}

/// Load an avatar back as base64. Users without one get an empty string.
pub fn load_avatar_b64(dir: &Path, file: Option<&str>) -> String {
    let Some(file) = file.filter(|f| !f.is_empty()) else {
        return String::new();
    };
    match std::fs::read(dir.join(file)) {
        Ok(bytes) => BASE64.encode(bytes),
        Err(_) => String::new(),
    }
}
