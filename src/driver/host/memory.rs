//! Backing store for host device memory objects.
//!
//! Work-items of a dispatch write disjoint elements of a buffer from many
//! threads at once, so the store is a slice of atomic 32-bit words rather
//! than a byte vector behind a lock. Elements wider than a word span
//! consecutive words; the kernel contract (each work-item owns its output
//! elements) keeps those multi-word writes from tearing.

use crate::dispatch::AccessMode;
use std::sync::atomic::{AtomicU32, Ordering};

const WORD: usize = std::mem::size_of::<u32>();

#[derive(Debug)]
pub(crate) struct DeviceMemory {
    words: Box<[AtomicU32]>,
    len: usize,
    access: AccessMode,
}

impl DeviceMemory {
    pub fn new(len: usize, access: AccessMode) -> Self {
        let words = (0..(len + WORD - 1) / WORD).map(|_| AtomicU32::new(0)).collect();
        Self { words, len, access }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn access(&self) -> AccessMode {
        self.access
    }

    fn load_byte(&self, index: usize) -> u8 {
        let word = self.words[index / WORD].load(Ordering::Relaxed);
        word.to_ne_bytes()[index % WORD]
    }

    pub fn read(&self, offset: usize, len: usize) -> Option<Vec<u8>> {
        let end = offset.checked_add(len)?;
        if end > self.len {
            return None;
        }
        Some((offset..end).map(|i| self.load_byte(i)).collect())
    }

    pub fn write(&self, offset: usize, data: &[u8]) -> bool {
        let Some(end) = offset.checked_add(data.len()) else {
            return false;
        };
        if end > self.len {
            return false;
        }

        let mut pos = offset;
        let mut rest = data;
        while !rest.is_empty() {
            let word_index = pos / WORD;
            let within = pos % WORD;
            let take = (WORD - within).min(rest.len());

            if within == 0 && take == WORD {
                let value = u32::from_ne_bytes([rest[0], rest[1], rest[2], rest[3]]);
                self.words[word_index].store(value, Ordering::Relaxed);
            } else {
                // partial word: merge into the current value
                let _ = self.words[word_index].fetch_update(
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                    |current| {
                        let mut bytes = current.to_ne_bytes();
                        bytes[within..within + take].copy_from_slice(&rest[..take]);
                        Some(u32::from_ne_bytes(bytes))
                    },
                );
            }

            pos += take;
            rest = &rest[take..];
        }
        true
    }

    /// First word of element `index`, if the whole element is in bounds.
    fn first_word<T: Element>(&self, index: usize) -> Option<usize> {
        if index >= self.elements::<T>() {
            return None;
        }
        Some(index * T::WORDS)
    }

    pub fn get<T: Element>(&self, index: usize) -> Option<T> {
        let first = self.first_word::<T>(index)?;
        let mut raw = [0u32; 2];
        for (slot, word) in raw.iter_mut().zip(&self.words[first..first + T::WORDS]) {
            *slot = word.load(Ordering::Relaxed);
        }
        Some(T::from_words(&raw[..T::WORDS]))
    }

    pub fn set<T: Element>(&self, index: usize, value: T) -> bool {
        let Some(first) = self.first_word::<T>(index) else {
            return false;
        };
        let mut raw = [0u32; 2];
        value.to_words(&mut raw[..T::WORDS]);
        for (word, value) in self.words[first..first + T::WORDS].iter().zip(raw) {
            word.store(value, Ordering::Relaxed);
        }
        true
    }

    /// Number of whole `T` elements the buffer holds.
    pub fn elements<T: Element>(&self) -> usize {
        self.len / (T::WORDS * WORD)
    }
}

/// Element types native kernels can read from and write to device memory.
pub trait Element: Copy + Send + Sync + 'static {
    /// Number of 32-bit words one element occupies (1 or 2).
    const WORDS: usize;
    const TYPE_NAME: &'static str;

    fn from_words(words: &[u32]) -> Self;
    fn to_words(self, out: &mut [u32]);
}

macro_rules! word_element {
    ($ty:ty, $name:literal) => {
        impl Element for $ty {
            const WORDS: usize = 1;
            const TYPE_NAME: &'static str = $name;

            fn from_words(words: &[u32]) -> Self {
                <$ty>::from_ne_bytes(words[0].to_ne_bytes())
            }

            fn to_words(self, out: &mut [u32]) {
                out[0] = u32::from_ne_bytes(self.to_ne_bytes());
            }
        }
    };
}

macro_rules! double_word_element {
    ($ty:ty, $name:literal) => {
        impl Element for $ty {
            const WORDS: usize = 2;
            const TYPE_NAME: &'static str = $name;

            fn from_words(words: &[u32]) -> Self {
                let mut bytes = [0u8; 8];
                bytes[..4].copy_from_slice(&words[0].to_ne_bytes());
                bytes[4..].copy_from_slice(&words[1].to_ne_bytes());
                <$ty>::from_ne_bytes(bytes)
            }

            fn to_words(self, out: &mut [u32]) {
                let bytes = self.to_ne_bytes();
                out[0] = u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                out[1] = u32::from_ne_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
            }
        }
    };
}

word_element!(f32, "float");
word_element!(i32, "int");
word_element!(u32, "uint");
double_word_element!(f64, "double");
double_word_element!(i64, "long");
double_word_element!(u64, "ulong");
