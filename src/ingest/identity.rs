//! Content-derived identifiers.
//!
//! Record ids are FNV-1a over the normalized (title, author, paragraphs)
//! tuple, so re-ingesting unchanged data reproduces the same primary keys and
//! the store's conflict-skip turns the second pass into a no-op. Author ids are
//! folded into a six-digit range and can collide.

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// ASCII unit separator between tuple fields.
const FIELD_SEPARATOR: u8 = 0x1f;

pub const AUTHOR_ID_MIN: i64 = 100_000;
pub const AUTHOR_ID_MAX: i64 = 999_999;

/// 64-bit FNV-1a, stable across builds and processes (unlike `DefaultHasher`).
#[derive(Debug, Clone, Copy)]
struct Fnv1a(u64);

impl Fnv1a {
    fn new() -> Self {
        Self(FNV_OFFSET_BASIS)
    }

    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= u64::from(b);
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }

    fn finish(self) -> u64 {
        self.0
    }
}

/// Raw FNV-1a 64 digest of `bytes`.
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut h = Fnv1a::new();
    h.write(bytes);
    h.finish()
}

/// Stable positive identity of a poem.
pub fn stable_id(title: &str, author: &str, paragraphs: &[String]) -> i64 {
    let mut h = Fnv1a::new();
    h.write(title.as_bytes());
    h.write(&[FIELD_SEPARATOR]);
    h.write(author.as_bytes());
    h.write(&[FIELD_SEPARATOR]);
    for (i, p) in paragraphs.iter().enumerate() {
        if i > 0 {
            h.write(b"\n");
        }
        h.write(p.as_bytes());
    }

    // Mask into i64's positive range; 0 is reserved for "unresolved".
    let id = (h.finish() & i64::MAX as u64) as i64;
    if id == 0 {
        1
    } else {
        id
    }
}

/// Six-digit author identity. Accepts collisions.
pub fn author_id(name: &str) -> i64 {
    let span = (AUTHOR_ID_MAX - AUTHOR_ID_MIN + 1) as u64;
    AUTHOR_ID_MIN + (fnv1a64(name.as_bytes()) % span) as i64
}

/// BLAKE3 hex digest of serialized paragraph content.
pub fn content_hash(content: &str) -> String {
    blake3::hash(content.as_bytes()).to_hex().to_string()
}

/// Serialize paragraphs the way they are stored (JSON array).
pub fn serialize_paragraphs(paragraphs: &[String]) -> serde_json::Result<String> {
    serde_json::to_string(paragraphs)
}
