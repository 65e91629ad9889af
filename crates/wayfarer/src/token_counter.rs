use anyhow::Result;
use tiktoken_rs::{o200k_base, CoreBPE};

/// Counts tokens with the o200k vocabulary of the gpt-4o model family
pub struct TokenCounter {
    bpe: CoreBPE,
}

impl TokenCounter {
    pub fn new() -> Result<Self> {
        Ok(Self { bpe: o200k_base()? })
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_tokens() -> Result<()> {
        let counter = TokenCounter::new()?;
        assert_eq!(counter.count_tokens(""), 0);
        assert!(counter.count_tokens("Plan a trip to Goa") > 0);

        let short = counter.count_tokens("beach");
        let long = counter.count_tokens(&"beach ".repeat(50));
        assert!(long > short);
        Ok(())
    }

    #[test]
    fn test_lines_count_independently() -> Result<()> {
        let counter = TokenCounter::new()?;
        let first = "Calangute beach has water sports";
        let second = "Fort Aguada overlooks the sea";
        let joined = format!("{}\n{}", first, second);
        assert_eq!(
            counter.count_tokens(&joined),
            counter.count_tokens(first) + counter.count_tokens("\n") + counter.count_tokens(second)
        );
        Ok(())
    }
}
