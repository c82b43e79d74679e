use crate::errors::{HarnessError, HarnessResult};
use phf::phf_map;
use serde::Serialize;
use std::fmt;

/// An enum that the load manager understands as a command line token.
///
/// Encoding goes through a static table rather than a `match` so a missing entry surfaces as
/// `InvalidVariant` instead of a silently wrong flag.
pub trait Token: Sized + Copy + PartialEq + fmt::Debug + 'static {
    /// Human readable name of the axis, used in error messages.
    const AXIS: &'static str;

    /// Every value of the enum, in declaration order.
    const ALL: &'static [Self];

    fn table() -> &'static [(Self, &'static str)];

    /// Accepted spellings when reading tokens from a config file or the command line.
    fn spellings() -> &'static phf::Map<&'static str, Self>;

    fn token(&self) -> HarnessResult<&'static str> {
        lookup_token(self, Self::table(), Self::AXIS)
    }

    fn parse_token(s: &str) -> HarnessResult<Self> {
        Self::spellings().get(s.trim()).copied().ok_or_else(|| {
            HarnessError::InvalidVariant(format!("unknown {} token '{}'", Self::AXIS, s))
        })
    }
}

/// Finds the token for `value` in `table`.
pub fn lookup_token<T: PartialEq + fmt::Debug>(
    value: &T,
    table: &[(T, &'static str)],
    axis: &str,
) -> HarnessResult<&'static str> {
    table
        .iter()
        .find(|(v, _)| v == value)
        .map(|(_, token)| *token)
        .ok_or_else(|| HarnessError::InvalidVariant(format!("{axis} {value:?} has no token")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum QueueAlgorithm {
    #[serde(rename = "FCFS")]
    Fcfs,
    #[serde(rename = "SJF")]
    Sjf,
    #[serde(rename = "LJF")]
    Ljf,
    #[serde(rename = "RAND")]
    Rand,
    #[serde(rename = "STACK")]
    Stack,
}

static QUEUE_TOKENS: &[(QueueAlgorithm, &str)] = &[
    (QueueAlgorithm::Fcfs, "FCFS"),
    (QueueAlgorithm::Sjf, "SJF"),
    (QueueAlgorithm::Ljf, "LJF"),
    (QueueAlgorithm::Rand, "RAND"),
    (QueueAlgorithm::Stack, "STACK"),
];

static QUEUE_SPELLINGS: phf::Map<&'static str, QueueAlgorithm> = phf_map! {
    "FCFS" => QueueAlgorithm::Fcfs,
    "SJF" => QueueAlgorithm::Sjf,
    "LJF" => QueueAlgorithm::Ljf,
    "RAND" => QueueAlgorithm::Rand,
    "Random" => QueueAlgorithm::Rand,
    "STACK" => QueueAlgorithm::Stack,
};

impl Token for QueueAlgorithm {
    const AXIS: &'static str = "queue algorithm";
    const ALL: &'static [Self] = &[
        QueueAlgorithm::Fcfs,
        QueueAlgorithm::Sjf,
        QueueAlgorithm::Ljf,
        QueueAlgorithm::Rand,
        QueueAlgorithm::Stack,
    ];

    fn table() -> &'static [(Self, &'static str)] {
        QUEUE_TOKENS
    }

    fn spellings() -> &'static phf::Map<&'static str, Self> {
        &QUEUE_SPELLINGS
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Selector {
    #[serde(rename = "RR")]
    RoundRobin,
    #[serde(rename = "R")]
    Random,
}

static SELECTOR_TOKENS: &[(Selector, &str)] =
    &[(Selector::RoundRobin, "RR"), (Selector::Random, "R")];

static SELECTOR_SPELLINGS: phf::Map<&'static str, Selector> = phf_map! {
    "RR" => Selector::RoundRobin,
    "RoundRobin" => Selector::RoundRobin,
    "R" => Selector::Random,
    "Random" => Selector::Random,
};

impl Token for Selector {
    const AXIS: &'static str = "selector";
    const ALL: &'static [Self] = &[Selector::RoundRobin, Selector::Random];

    fn table() -> &'static [(Self, &'static str)] {
        SELECTOR_TOKENS
    }

    fn spellings() -> &'static phf::Map<&'static str, Self> {
        &SELECTOR_SPELLINGS
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Strategy {
    #[serde(rename = "M")]
    Mixed,
    #[serde(rename = "PR")]
    PriceRank,
    #[serde(rename = "PO")]
    PopularityRank,
    #[serde(rename = "PRO")]
    PriceRankPopularity,
}

static STRATEGY_TOKENS: &[(Strategy, &str)] = &[
    (Strategy::Mixed, "M"),
    (Strategy::PriceRank, "PR"),
    (Strategy::PopularityRank, "PO"),
    (Strategy::PriceRankPopularity, "PRO"),
];

static STRATEGY_SPELLINGS: phf::Map<&'static str, Strategy> = phf_map! {
    "M" => Strategy::Mixed,
    "Mixed" => Strategy::Mixed,
    "PR" => Strategy::PriceRank,
    "PriceRank" => Strategy::PriceRank,
    "PO" => Strategy::PopularityRank,
    "PopularityRank" => Strategy::PopularityRank,
    "PRO" => Strategy::PriceRankPopularity,
    "PriceRankPopularity" => Strategy::PriceRankPopularity,
};

impl Token for Strategy {
    const AXIS: &'static str = "strategy";
    const ALL: &'static [Self] = &[
        Strategy::Mixed,
        Strategy::PriceRank,
        Strategy::PopularityRank,
        Strategy::PriceRankPopularity,
    ];

    fn table() -> &'static [(Self, &'static str)] {
        STRATEGY_TOKENS
    }

    fn spellings() -> &'static phf::Map<&'static str, Self> {
        &STRATEGY_SPELLINGS
    }
}

macro_rules! display_as_token {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.token() {
                    Ok(token) => write!(f, "{token}"),
                    Err(_) => write!(f, "{self:?}"),
                }
            }
        })*
    };
}

display_as_token!(QueueAlgorithm, Selector, Strategy);

/// One point in the experiment parameter space. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ExperimentVariant {
    node_count: usize,
    queue_algorithm: QueueAlgorithm,
    selector: Selector,
    strategy: Strategy,
}
impl ExperimentVariant {
    pub fn new(
        node_count: usize,
        queue_algorithm: QueueAlgorithm,
        selector: Selector,
        strategy: Strategy,
    ) -> HarnessResult<Self> {
        if node_count == 0 {
            return Err(HarnessError::InvalidVariant(
                "node count must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            node_count,
            queue_algorithm,
            selector,
            strategy,
        })
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn queue_algorithm(&self) -> QueueAlgorithm {
        self.queue_algorithm
    }

    pub fn selector(&self) -> Selector {
        self.selector
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn with_node_count(self, node_count: usize) -> HarnessResult<Self> {
        Self::new(node_count, self.queue_algorithm, self.selector, self.strategy)
    }

    pub fn with_queue_algorithm(self, queue_algorithm: QueueAlgorithm) -> Self {
        Self {
            queue_algorithm,
            ..self
        }
    }

    pub fn with_selector(self, selector: Selector) -> Self {
        Self { selector, ..self }
    }

    pub fn with_strategy(self, strategy: Strategy) -> Self {
        Self { strategy, ..self }
    }
}

impl fmt::Display for ExperimentVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "nodes={} queue={} selector={} strategy={}",
            self.node_count, self.queue_algorithm, self.selector, self.strategy
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_table_complete<T: Token>() {
        for value in T::ALL {
            let token = value.token().expect("every value should have a token");
            assert_eq!(T::parse_token(token).expect("tokens should parse back"), *value);
        }
        assert_eq!(T::table().len(), T::ALL.len());
    }

    #[test]
    fn token_tables_cover_every_value() {
        assert_table_complete::<QueueAlgorithm>();
        assert_table_complete::<Selector>();
        assert_table_complete::<Strategy>();
    }

    #[test]
    fn tokens_match_the_load_manager_flags() {
        let cases = [
            (QueueAlgorithm::Fcfs.token(), "FCFS"),
            (Selector::RoundRobin.token(), "RR"),
            (Selector::Random.token(), "R"),
            (Strategy::Mixed.token(), "M"),
            (Strategy::PriceRank.token(), "PR"),
            (Strategy::PopularityRank.token(), "PO"),
            (Strategy::PriceRankPopularity.token(), "PRO"),
        ];

        for (token, expected) in cases {
            assert_eq!(token.expect("token"), expected);
        }
    }

    #[test]
    fn missing_table_entry_is_invalid_variant() {
        let partial = [(Selector::RoundRobin, "RR")];
        let res = lookup_token(&Selector::Random, &partial, "selector");
        assert!(matches!(res, Err(HarnessError::InvalidVariant(_))));
    }

    #[test]
    fn aliases_are_accepted() -> anyhow::Result<()> {
        assert_eq!(QueueAlgorithm::parse_token("Random")?, QueueAlgorithm::Rand);
        assert_eq!(Selector::parse_token("RoundRobin")?, Selector::RoundRobin);
        assert_eq!(Strategy::parse_token(" PRO ")?, Strategy::PriceRankPopularity);
        Ok(())
    }

    #[test]
    fn unknown_tokens_are_rejected() {
        assert!(matches!(
            QueueAlgorithm::parse_token("MLFQ"),
            Err(HarnessError::InvalidVariant(_))
        ));
        assert!(matches!(
            Selector::parse_token("rr"),
            Err(HarnessError::InvalidVariant(_))
        ));
    }

    #[test]
    fn zero_nodes_is_rejected() {
        let res = ExperimentVariant::new(0, QueueAlgorithm::Fcfs, Selector::RoundRobin, Strategy::Mixed);
        assert!(matches!(res, Err(HarnessError::InvalidVariant(_))));
    }

    #[test]
    fn display_uses_tokens() -> anyhow::Result<()> {
        let variant =
            ExperimentVariant::new(4, QueueAlgorithm::Fcfs, Selector::RoundRobin, Strategy::Mixed)?;
        assert_eq!(
            variant.to_string(),
            "nodes=4 queue=FCFS selector=RR strategy=M"
        );
        Ok(())
    }
}
