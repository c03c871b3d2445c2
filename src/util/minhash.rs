use std::collections::HashSet;

/// First prime above 2^32; keeps `(a * shingle + b) mod P` well distributed.
const NEXT_PRIME: u64 = 4_294_967_311;
const COEFF_SEED: u64 = 42;
const SHINGLE_SIZE: usize = 3;

pub const DEFAULT_NUM_HASHES: usize = 100;

/// MinHash engine: signatures over shingled text approximate Jaccard
/// similarity of the shingle sets in O(k) per comparison, instead of
/// intersecting shingle sets for every source/candidate pair.
///
/// Coefficients are drawn from a fixed seed so signatures computed in
/// different processes stay comparable.
pub struct MinHashEngine {
    num_hashes: usize,
    coeff_a: Vec<u64>,
    coeff_b: Vec<u64>,
}

impl MinHashEngine {
    pub fn new(num_hashes: usize) -> Self {
        let mut rng = fastrand::Rng::with_seed(COEFF_SEED);
        let coeff_a = pick_unique_coeffs(&mut rng, num_hashes);
        let coeff_b = pick_unique_coeffs(&mut rng, num_hashes);
        Self {
            num_hashes,
            coeff_a,
            coeff_b,
        }
    }

    pub fn num_hashes(&self) -> usize {
        self.num_hashes
    }

    /// Signature for a text, or `None` when the text yields no shingles.
    pub fn text_signature(&self, text: &str) -> Option<Vec<f64>> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return None;
        }
        let shingles = shingle(&tokens, SHINGLE_SIZE);
        if shingles.is_empty() {
            return None;
        }
        Some(self.signature(&shingles))
    }

    fn signature(&self, shingles: &HashSet<u32>) -> Vec<f64> {
        let mut signature = Vec::with_capacity(self.num_hashes);
        for i in 0..self.num_hashes {
            let mut min_hash = NEXT_PRIME + 1;
            for &s in shingles {
                let hash = (self.coeff_a[i] * u64::from(s) + self.coeff_b[i]) % NEXT_PRIME;
                if hash < min_hash {
                    min_hash = hash;
                }
            }
            signature.push(min_hash as f64);
        }
        signature
    }
}

fn pick_unique_coeffs(rng: &mut fastrand::Rng, count: usize) -> Vec<u64> {
    let mut seen = HashSet::with_capacity(count);
    let mut coeffs = Vec::with_capacity(count);
    while coeffs.len() < count {
        let candidate = rng.u64(0..=u64::from(u32::MAX));
        if seen.insert(candidate) {
            coeffs.push(candidate);
        }
    }
    coeffs
}

/// Lowercase, split on whitespace, drop single-character tokens.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .filter(|w| w.chars().count() > 1)
        .map(str::to_string)
        .collect()
}

/// CRC32 hashes of every contiguous `size`-token window, space-joined. Texts
/// shorter than one window hash as a single shingle.
fn shingle(tokens: &[String], size: usize) -> HashSet<u32> {
    if tokens.is_empty() {
        return HashSet::new();
    }

    if tokens.len() < size {
        let joined = tokens.join(" ");
        return HashSet::from([crc32fast::hash(joined.as_bytes())]);
    }

    tokens
        .windows(size)
        .map(|window| crc32fast::hash(window.join(" ").as_bytes()))
        .collect()
}

/// Cosine similarity over two signatures; a missing signature scores 0.0.
pub fn similarity(a: Option<&[f64]>, b: Option<&[f64]>) -> f64 {
    let (Some(a), Some(b)) = (a, b) else {
        return 0.0;
    };
    cosine(a, b)
}

pub fn cosine(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
