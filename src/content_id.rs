use blake3::Hash;

use std::{fmt::Display, fs::File, io::Read, path::Path};

/// Identifies a piece of checked out content.
/// Under the hood, this is a [`blake3`] hash.
///
/// It is displayed in hexadecimal format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentId(Hash);

impl Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_hex())
    }
}

impl From<&[u8]> for ContentId {
    fn from(bytes: &[u8]) -> Self {
        ContentId(blake3::hash(bytes))
    }
}

impl TryFrom<File> for ContentId {
    type Error = std::io::Error;

    fn try_from(mut f: File) -> Result<Self, Self::Error> {
        let mut hasher = blake3::Hasher::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = f.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(ContentId(hasher.finalize()))
    }
}

impl TryFrom<&Path> for ContentId {
    type Error = std::io::Error;

    fn try_from(p: &Path) -> Result<Self, Self::Error> {
        let f = File::options().read(true).open(p)?;
        ContentId::try_from(f)
    }
}

#[test]
fn test_file_and_bytes_agree() -> Result<(), std::io::Error> {
    let from_path = ContentId::try_from(Path::new("./src/lib.rs"))?;
    let from_bytes = ContentId::from(&std::fs::read("./src/lib.rs")?[..]);
    assert_eq!(from_path, from_bytes);
    assert_eq!(from_path.to_string().len(), 64);
    assert_ne!(from_bytes, ContentId::from(&b"other"[..]));
    Ok(())
}
