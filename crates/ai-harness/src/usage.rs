//! Token and cost accounting.
//!
//! Usage is a plain value folded at terminal time: the assembler copies the
//! provider's numbers into the message, sessions sum finished messages.

use std::iter::Sum;
use std::ops::AddAssign;

/// Cost breakdown in USD.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Cost {
    pub input: f64,
    pub output: f64,
    pub cache_read: f64,
    pub cache_write: f64,
    pub total: f64,
}

impl Cost {
    fn is_zero(&self) -> bool {
        self.input == 0.0
            && self.output == 0.0
            && self.cache_read == 0.0
            && self.cache_write == 0.0
            && self.total == 0.0
    }
}

impl AddAssign<&Cost> for Cost {
    fn add_assign(&mut self, rhs: &Cost) {
        self.input += rhs.input;
        self.output += rhs.output;
        self.cache_read += rhs.cache_read;
        self.cache_write += rhs.cache_write;
        self.total += rhs.total;
    }
}

/// Token usage and cost for one message or a whole session.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Usage {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
    pub total_tokens: u64,
    pub cost: Cost,
}

impl Usage {
    /// Creates usage from input/output token counts with a derived total.
    pub fn tokens(input: u64, output: u64) -> Self {
        Self {
            input,
            output,
            ..Self::default()
        }
        .with_derived_total()
    }

    /// True when no token count and no cost has been reported.
    pub fn is_zero(&self) -> bool {
        self.input == 0
            && self.output == 0
            && self.cache_read == 0
            && self.cache_write == 0
            && self.total_tokens == 0
            && self.cost.is_zero()
    }

    /// Fills `total_tokens` from the per-category counts when the provider
    /// left it at zero.
    pub fn with_derived_total(mut self) -> Self {
        if self.total_tokens == 0 {
            self.total_tokens = self
                .input
                .saturating_add(self.output)
                .saturating_add(self.cache_read)
                .saturating_add(self.cache_write);
        }
        self
    }

    /// Adds another usage record into this one.
    pub fn add(&mut self, other: &Usage) {
        self.input = self.input.saturating_add(other.input);
        self.output = self.output.saturating_add(other.output);
        self.cache_read = self.cache_read.saturating_add(other.cache_read);
        self.cache_write = self.cache_write.saturating_add(other.cache_write);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
        self.cost += &other.cost;
    }

    /// Sums any number of usage records.
    pub fn total<'a>(usages: impl IntoIterator<Item = &'a Usage>) -> Usage {
        usages.into_iter().sum()
    }

    /// Computes the cost breakdown for this usage, stores it in `self.cost`
    /// and returns it.
    pub fn calculate_cost(&mut self, pricing: &ModelPricing) -> Cost {
        let per_token = |tokens: u64, per_million: f64| tokens as f64 * per_million / 1_000_000.0;
        let mut cost = Cost {
            input: per_token(self.input, pricing.input),
            output: per_token(self.output, pricing.output),
            cache_read: per_token(self.cache_read, pricing.cache_read),
            cache_write: per_token(self.cache_write, pricing.cache_write),
            total: 0.0,
        };
        cost.total = cost.input + cost.output + cost.cache_read + cost.cache_write;
        self.cost = cost;
        cost
    }
}

impl AddAssign<&Usage> for Usage {
    fn add_assign(&mut self, rhs: &Usage) {
        self.add(rhs);
    }
}

impl<'a> Sum<&'a Usage> for Usage {
    fn sum<I: Iterator<Item = &'a Usage>>(iter: I) -> Self {
        iter.fold(Usage::default(), |mut acc, usage| {
            acc.add(usage);
            acc
        })
    }
}

/// USD price per million tokens for each usage category.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
    #[serde(default)]
    pub cache_read: f64,
    #[serde(default)]
    pub cache_write: f64,
}

impl ModelPricing {
    /// Creates pricing with input/output rates and no cache pricing.
    pub fn new(input: f64, output: f64) -> Self {
        Self {
            input,
            output,
            cache_read: 0.0,
            cache_write: 0.0,
        }
    }

    /// Sets cache read/write rates.
    pub fn with_cache(mut self, cache_read: f64, cache_write: f64) -> Self {
        self.cache_read = cache_read;
        self.cache_write = cache_write;
        self
    }
}

/// How terminal usage combines with usage reported earlier in the stream.
///
/// Some providers only report usage on an early chunk and send zeros on the
/// final one; adapters for those keep [`UsagePolicy::PreserveProvisional`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UsagePolicy {
    /// The terminal event's usage always wins.
    ReplaceWithTerminal,
    /// The terminal event's usage wins unless it is all zero.
    #[default]
    PreserveProvisional,
}

impl UsagePolicy {
    /// Resolves the usage a terminal event leaves on the message.
    pub fn resolve(self, provisional: Usage, terminal: Usage) -> Usage {
        match self {
            Self::PreserveProvisional if terminal.is_zero() => provisional,
            _ => terminal,
        }
    }
}
