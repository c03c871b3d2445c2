pub mod embedding;
pub mod minhash;
pub mod redirect;
pub mod title;
pub mod url_norm;
