//! Number to English words: a reference [`BatchExecutor`] used by the demo and tests.

use crate::collapser::{BatchExecutor, BatchMapping};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const ONES: [&str; 20] = [
    "zero",
    "one",
    "two",
    "three",
    "four",
    "five",
    "six",
    "seven",
    "eight",
    "nine",
    "ten",
    "eleven",
    "twelve",
    "thirteen",
    "fourteen",
    "fifteen",
    "sixteen",
    "seventeen",
    "eighteen",
    "nineteen",
];

const TENS: [&str; 10] = [
    "", "", "twenty", "thirty", "forty", "fifty", "sixty", "seventy", "eighty", "ninety",
];

const SCALES: [(u64, &str); 6] = [
    (1_000_000_000_000_000_000, "quintillion"),
    (1_000_000_000_000_000, "quadrillion"),
    (1_000_000_000_000, "trillion"),
    (1_000_000_000, "billion"),
    (1_000_000, "million"),
    (1_000, "thousand"),
];

/// Spell out `n` in US English, e.g. `221` -> `"two hundred twenty-one"`.
pub fn number_to_words(n: u64) -> String {
    if n == 0 {
        return ONES[0].to_string();
    }
    let mut parts = Vec::new();
    let mut rest = n;
    for (scale, name) in SCALES {
        if rest >= scale {
            parts.push(format!("{} {}", below_thousand(rest / scale), name));
            rest %= scale;
        }
    }
    if rest > 0 {
        parts.push(below_thousand(rest));
    }
    parts.join(" ")
}

fn below_thousand(n: u64) -> String {
    let (hundreds, rest) = (n / 100, n % 100);
    let tail = match rest {
        0 => None,
        1..=19 => Some(ONES[rest as usize].to_string()),
        _ if rest % 10 == 0 => Some(TENS[(rest / 10) as usize].to_string()),
        _ => Some(format!(
            "{}-{}",
            TENS[(rest / 10) as usize],
            ONES[(rest % 10) as usize]
        )),
    };
    match (hundreds, tail) {
        (0, Some(tail)) => tail,
        (h, None) => format!("{} hundred", ONES[h as usize]),
        (h, Some(tail)) => format!("{} hundred {}", ONES[h as usize], tail),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberWord {
    pub number: u64,
    pub word: String,
}

/// Translates every requested number; never fails, never omits a key.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumbersToWords;

#[async_trait]
impl BatchExecutor<u64, NumberWord> for NumbersToWords {
    async fn execute(&self, keys: Vec<u64>) -> anyhow::Result<Vec<NumberWord>> {
        Ok(keys
            .into_iter()
            .map(|number| NumberWord {
                number,
                word: number_to_words(number),
            })
            .collect())
    }
}

/// Mapping that resolves each number to its word.
pub fn number_words_mapping() -> BatchMapping<u64, NumberWord, String> {
    BatchMapping::new(NumbersToWords, |nw: &NumberWord| nw.number, |nw: &NumberWord| {
        nw.word.clone()
    })
}
