//! Binary to `$readmemh` memory image encoding
//!
//! Converts an arbitrary byte stream into fixed-width words rendered as
//! lowercase hex, one word per line. The output length is controlled by a
//! minimum word count (zero padding) and an optional hard maximum
//! (truncation with a warning).

use std::{
    fmt,
    fs,
    path::Path,
    str::FromStr,
};

use serde::{
    Deserialize,
    Serialize,
};
use tracing::{
    debug,
    warn,
};

use crate::error::{
    RvTestError,
    RvTestResult,
};

/// Word sizes the encoder accepts, in bytes
pub const SUPPORTED_WORD_SIZES: [usize; 4] = [1, 2, 4, 8];

/// Byte order used to assemble a word from consecutive bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    /// Least significant byte first
    #[default]
    Little,
    /// Most significant byte first
    Big,
}

impl fmt::Display for Endianness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endianness::Little => write!(f, "little"),
            Endianness::Big => write!(f, "big"),
        }
    }
}

impl FromStr for Endianness {
    type Err = RvTestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "little" | "le" => Ok(Endianness::Little),
            "big" | "be" => Ok(Endianness::Big),
            other => Err(RvTestError::Config(format!(
                "Invalid endianness '{}'. Valid values: little, big",
                other
            ))),
        }
    }
}

/// Encoding parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Bytes per word (1, 2, 4 or 8)
    pub word_size:  usize,
    /// Byte order inside a word
    pub endianness: Endianness,
    /// Pad the image with zero words up to this count
    pub min_words:  usize,
    /// Truncate the image to this count when the input is longer
    pub max_words:  Option<usize>,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            word_size:  4,
            endianness: Endianness::Little,
            min_words:  0,
            max_words:  None,
        }
    }
}

impl EncodeOptions {
    /// Options for a given word size and byte order with no length control
    pub fn new(word_size: usize, endianness: Endianness) -> Self {
        Self {
            word_size,
            endianness,
            ..Default::default()
        }
    }

    /// Set the zero-padding floor
    pub fn with_min_words(mut self, min_words: usize) -> Self {
        self.min_words = min_words;
        self
    }

    /// Set the hard word count limit
    pub fn with_max_words(mut self, max_words: usize) -> Self {
        self.max_words = Some(max_words);
        self
    }
}

/// Non-fatal notice recorded when input exceeded the hard word limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Truncation {
    /// Word count the input would have produced
    pub natural_words: usize,
    /// Word count actually kept
    pub kept_words:    usize,
}

impl fmt::Display for Truncation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "image truncated from {} to {} words ({} words dropped)",
            self.natural_words,
            self.kept_words,
            self.natural_words - self.kept_words
        )
    }
}

/// A memory image ready to be written for `$readmemh`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    word_size:  usize,
    words:      Vec<u64>,
    truncation: Option<Truncation>,
}

impl EncodedImage {
    /// Bytes per word
    pub fn word_size(&self) -> usize {
        self.word_size
    }

    /// Number of words in the image
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether the image holds no words at all
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Word values in image order
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// Truncation notice, if the input was cut short
    pub fn truncation(&self) -> Option<Truncation> {
        self.truncation
    }

    /// Iterate over the rendered hex lines (without newlines)
    pub fn lines(&self) -> impl Iterator<Item = String> + '_ {
        let width = self.word_size * 2;
        self.words.iter().map(move |word| format!("{:0width$x}", word, width = width))
    }

    /// Render the whole image, one newline-terminated line per word
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.words.len() * (self.word_size * 2 + 1));
        for line in self.lines() {
            out.push_str(&line);
            out.push('\n');
        }
        out
    }

    /// Write the rendered image to `path`
    pub fn write_to(&self, path: &Path) -> RvTestResult<()> {
        fs::write(path, self.render()).map_err(|e| RvTestError::io(path, e))
    }

    /// Reassemble the image bytes according to `endianness`
    pub fn to_bytes(&self, endianness: Endianness) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.words.len() * self.word_size);
        for &word in &self.words {
            push_word(&mut bytes, word, self.word_size, endianness);
        }
        bytes
    }
}

/// Encode `bytes` into a word image
pub fn encode(bytes: &[u8], options: &EncodeOptions) -> RvTestResult<EncodedImage> {
    let word_size = validate_word_size(options.word_size)?;

    let mut words: Vec<u64> = bytes
        .chunks(word_size)
        .map(|chunk| word_from_chunk(chunk, word_size, options.endianness))
        .collect();

    let natural_words = words.len();
    if words.len() < options.min_words {
        words.resize(options.min_words, 0);
    }

    let mut truncation = None;
    if let Some(max_words) = options.max_words {
        if words.len() > max_words {
            let notice = Truncation {
                natural_words: words.len(),
                kept_words:    max_words,
            };
            warn!("{}", notice);
            words.truncate(max_words);
            truncation = Some(notice);
        }
    }

    debug!(
        bytes = bytes.len(),
        natural_words,
        words = words.len(),
        word_size,
        "encoded memory image"
    );

    Ok(EncodedImage {
        word_size,
        words,
        truncation,
    })
}

/// Parse a rendered image back into bytes
pub fn decode(text: &str, word_size: usize, endianness: Endianness) -> RvTestResult<Vec<u8>> {
    let word_size = validate_word_size(word_size)?;
    let width = word_size * 2;
    let mut bytes = Vec::new();

    for (index, line) in text.lines().enumerate() {
        if line.len() != width {
            return Err(RvTestError::Config(format!(
                "line {} has {} digits, expected {}",
                index + 1,
                line.len(),
                width
            )));
        }
        let word = u64::from_str_radix(line, 16).map_err(|e| {
            RvTestError::Config(format!("line {} is not hex ('{}'): {}", index + 1, line, e))
        })?;
        push_word(&mut bytes, word, word_size, endianness);
    }

    Ok(bytes)
}

/// Size summary of a binary file as seen by the encoder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryInfo {
    /// Input length in bytes
    pub size_bytes: usize,
    /// Input length in words, rounded up
    pub size_words: usize,
    /// Bytes per word
    pub word_size:  usize,
    /// Byte order
    pub endianness: Endianness,
}

/// Describe how `bytes` would be encoded
pub fn binary_info(bytes: &[u8], word_size: usize, endianness: Endianness) -> BinaryInfo {
    BinaryInfo {
        size_bytes: bytes.len(),
        size_words: bytes.len().div_ceil(word_size.max(1)),
        word_size,
        endianness,
    }
}

/// File-to-file converter
#[derive(Debug, Clone, Default)]
pub struct HexConverter {
    options: EncodeOptions,
}

impl HexConverter {
    /// Create a converter with the given options
    pub fn new(options: EncodeOptions) -> Self {
        Self { options }
    }

    /// Options in use
    pub fn options(&self) -> &EncodeOptions {
        &self.options
    }

    /// Read `input`, encode it and write the image to `output`
    pub fn convert_file(&self, input: &Path, output: &Path) -> RvTestResult<EncodedImage> {
        let bytes = fs::read(input).map_err(|e| RvTestError::io(input, e))?;
        let image = encode(&bytes, &self.options)?;
        image.write_to(output)?;
        Ok(image)
    }

    /// Describe `input` without converting it
    pub fn info(&self, input: &Path) -> RvTestResult<BinaryInfo> {
        let bytes = fs::read(input).map_err(|e| RvTestError::io(input, e))?;
        Ok(binary_info(&bytes, self.options.word_size, self.options.endianness))
    }
}

fn validate_word_size(word_size: usize) -> RvTestResult<usize> {
    if SUPPORTED_WORD_SIZES.contains(&word_size) {
        Ok(word_size)
    } else {
        Err(RvTestError::Config(format!(
            "Unsupported word size {} (expected one of {:?})",
            word_size, SUPPORTED_WORD_SIZES
        )))
    }
}

// Short trailing chunks are zero-padded on the high-address side.
fn word_from_chunk(chunk: &[u8], word_size: usize, endianness: Endianness) -> u64 {
    let mut buf = [0u8; 8];
    buf[..chunk.len()].copy_from_slice(chunk);
    let word = &buf[..word_size];

    match endianness {
        Endianness::Little => word.iter().rev().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)),
        Endianness::Big => word.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)),
    }
}

fn push_word(bytes: &mut Vec<u8>, word: u64, word_size: usize, endianness: Endianness) {
    match endianness {
        Endianness::Little => bytes.extend_from_slice(&word.to_le_bytes()[..word_size]),
        Endianness::Big => bytes.extend_from_slice(&word.to_be_bytes()[8 - word_size..]),
    }
}
