//! Creative weight strategies.
//!
//! A strategy reorders and reweighs the creatives eligible for one slot before
//! the placement search runs over them.
use crate::Error;
use primitives::{
    codec::{self, Decode, Encode},
    Creative,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    io::{Read, Write},
};

/// A creative competing for a slot together with its effective weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CreativeWeight<'a> {
    pub creative: &'a Creative,
    pub weight: f64,
}

impl<'a> CreativeWeight<'a> {
    pub fn new(creative: &'a Creative) -> Self {
        Self {
            creative,
            weight: creative.weight,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StrategyConfig", into = "StrategyConfig")]
pub enum CreativeWeightStrategy {
    /// Creatives keep their configured weights
    None,
    /// Shuffles creatives by weighted sampling so that a heavy creative wins
    /// most of the time but not always.
    Probabilistic {
        /// Bound of the lighter bands' weight relative to each heavier band,
        /// in `(0, 1]`
        reduction_rate: f32,
        weight_zones: u32,
    },
}

/// Configuration form of [`CreativeWeightStrategy`], checked when converted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StrategyConfig {
    None,
    Probabilistic {
        #[serde(default = "default_reduction_rate")]
        reduction_rate: f32,
        #[serde(default = "default_weight_zones")]
        weight_zones: u32,
    },
}

impl TryFrom<StrategyConfig> for CreativeWeightStrategy {
    type Error = Error;

    fn try_from(config: StrategyConfig) -> Result<Self, Self::Error> {
        match config {
            StrategyConfig::None => Ok(Self::None),
            StrategyConfig::Probabilistic {
                reduction_rate,
                weight_zones,
            } => Self::checked_probabilistic(reduction_rate, weight_zones),
        }
    }
}

impl From<CreativeWeightStrategy> for StrategyConfig {
    fn from(strategy: CreativeWeightStrategy) -> Self {
        match strategy {
            CreativeWeightStrategy::None => Self::None,
            CreativeWeightStrategy::Probabilistic {
                reduction_rate,
                weight_zones,
            } => Self::Probabilistic {
                reduction_rate,
                weight_zones,
            },
        }
    }
}

fn default_reduction_rate() -> f32 {
    1.0
}

fn default_weight_zones() -> u32 {
    10
}

impl Default for CreativeWeightStrategy {
    fn default() -> Self {
        Self::None
    }
}

impl CreativeWeightStrategy {
    pub fn probabilistic() -> Self {
        Self::Probabilistic {
            reduction_rate: default_reduction_rate(),
            weight_zones: default_weight_zones(),
        }
    }

    /// Probabilistic strategy with its parameters checked.
    ///
    /// Zero weight zones turn the shuffle off, giving [`Self::None`].
    pub fn checked_probabilistic(reduction_rate: f32, weight_zones: u32) -> Result<Self, Error> {
        if weight_zones == 0 {
            return Ok(Self::None);
        }

        let in_range = reduction_rate > 0.0 && reduction_rate <= 1.0;
        if !in_range {
            return Err(Error::InvalidReductionRate(reduction_rate));
        }

        Ok(Self::Probabilistic {
            reduction_rate,
            weight_zones,
        })
    }

    fn tag(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::Probabilistic { .. } => 1,
        }
    }

    pub fn set_weights<R: Rng + ?Sized>(&self, weights: &mut Vec<CreativeWeight<'_>>, rng: &mut R) {
        match *self {
            Self::None => {}
            Self::Probabilistic {
                reduction_rate,
                weight_zones,
            } => shuffle_by_weight(weights, f64::from(reduction_rate), weight_zones, rng),
        }
    }
}

impl fmt::Display for CreativeWeightStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Probabilistic {
                reduction_rate,
                weight_zones,
            } => write!(
                f,
                "probabilistic (reduction rate {}, weight zones {})",
                reduction_rate, weight_zones
            ),
        }
    }
}

impl Encode for CreativeWeightStrategy {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), codec::Error> {
        self.tag().encode(writer)?;

        match self {
            Self::None => Ok(()),
            Self::Probabilistic {
                reduction_rate,
                weight_zones,
            } => {
                reduction_rate.encode(writer)?;
                weight_zones.encode(writer)
            }
        }
    }
}

impl CreativeWeightStrategy {
    /// Reads the strategy tag and its parameters.
    pub fn decode<R: Read>(reader: &mut R) -> Result<Self, Error> {
        match u32::decode(reader)? {
            0 => Ok(Self::None),
            1 => {
                let reduction_rate = f32::decode(reader)?;
                let weight_zones = u32::decode(reader)?;

                Self::checked_probabilistic(reduction_rate, weight_zones)
            }
            unknown => Err(Error::UnknownStrategy(unknown)),
        }
    }
}

/// Creatives of similar weight.
#[derive(Debug)]
struct WeightBand<'a> {
    members: Vec<CreativeWeight<'a>>,
    total_weight: f64,
    /// Total weight of this band and every lighter band
    cumulative_weight: f64,
}

impl WeightBand<'_> {
    fn scale(&mut self, factor: f64) {
        for member in &mut self.members {
            member.weight *= factor;
        }

        self.total_weight *= factor;
        self.cumulative_weight *= factor;
    }
}

fn shuffle_by_weight<R: Rng + ?Sized>(
    weights: &mut Vec<CreativeWeight<'_>>,
    reduction_rate: f64,
    weight_zones: u32,
    rng: &mut R,
) {
    if weights.len() < 2 {
        return;
    }

    weights.sort_by(|a, b| a.weight.total_cmp(&b.weight));

    // Handed out in draw order: the first drawn creative gets the top weight
    let ranks: Vec<f64> = weights.iter().rev().map(|weight| weight.weight).collect();

    let mut bands = split_into_bands(weights, weight_zones);
    downgrade_lighter_bands(&mut bands, reduction_rate);

    let mut shuffled = Vec::with_capacity(ranks.len());
    for rank in ranks {
        match random_take(&mut bands, rng) {
            Some(taken) => shuffled.push(CreativeWeight {
                creative: taken.creative,
                weight: rank,
            }),
            None => break,
        }
    }

    shuffled.reverse();
    *weights = shuffled;
}

/// Groups ascending, pre-sorted weights (scaled by 100) into bands whose
/// weight span is about `1 / weight_zones` of the whole span.
fn split_into_bands<'a>(sorted: &[CreativeWeight<'a>], weight_zones: u32) -> Vec<WeightBand<'a>> {
    let scaled: Vec<CreativeWeight<'a>> = sorted
        .iter()
        .map(|weight| CreativeWeight {
            creative: weight.creative,
            weight: weight.weight * 100.0,
        })
        .collect();

    let (min, max) = match (scaled.first(), scaled.last()) {
        (Some(min), Some(max)) => (min.weight, max.weight),
        _ => return Vec::new(),
    };

    let interval = if weight_zones > 1 {
        ((max - min) / f64::from(weight_zones)).max(1.0)
    } else {
        f64::from(u32::MAX)
    };

    let mut bands: Vec<WeightBand<'a>> = Vec::new();
    let mut next_band_weight = min;
    let mut cumulative_weight = 0.0;

    for weight in scaled {
        if bands.is_empty() || weight.weight >= next_band_weight {
            bands.push(WeightBand {
                members: Vec::new(),
                total_weight: 0.0,
                cumulative_weight,
            });
            next_band_weight = weight.weight + interval;
        }

        if let Some(band) = bands.last_mut() {
            band.total_weight += weight.weight;
            band.cumulative_weight += weight.weight;
            band.members.push(weight);
        }

        cumulative_weight += weight.weight;
    }

    bands
}

/// Going up from the lightest band, keeps the weight of all lighter bands
/// within `reduction_rate` of each band's own total.
fn downgrade_lighter_bands(bands: &mut [WeightBand<'_>], reduction_rate: f64) {
    for upper in 1..bands.len() {
        let (lighter, heavier) = bands.split_at_mut(upper);
        let band = &mut heavier[0];

        let max_weight = band.total_weight * reduction_rate;
        let lighter_weight = lighter.last().map_or(0.0, |band| band.cumulative_weight);

        if lighter_weight > max_weight && lighter_weight > 0.0 {
            let factor = max_weight / lighter_weight;
            lighter.iter_mut().for_each(|band| band.scale(factor));
        }

        band.cumulative_weight =
            lighter.last().map_or(0.0, |band| band.cumulative_weight) + band.total_weight;
    }
}

/// Draws one creative with probability proportional to its weight and
/// removes it from the bands.
fn random_take<'a, R: Rng + ?Sized>(
    bands: &mut Vec<WeightBand<'a>>,
    rng: &mut R,
) -> Option<CreativeWeight<'a>> {
    let total = bands.last()?.cumulative_weight;
    let target = rng.gen::<f64>() * total;

    let mut position = None;
    let mut cumulative = 0.0;

    for (band_index, band) in bands.iter().enumerate() {
        if target < band.cumulative_weight {
            let member_index = band
                .members
                .iter()
                .position(|member| {
                    cumulative += member.weight;
                    target < cumulative
                })
                .unwrap_or(band.members.len() - 1);

            position = Some((band_index, member_index));
            break;
        }

        cumulative = band.cumulative_weight;
    }

    let (band_index, member_index) = match position {
        Some(position) => position,
        None => {
            let band_index = bands.len() - 1;
            (band_index, bands[band_index].members.len() - 1)
        }
    };

    let taken = bands[band_index].members.remove(member_index);
    bands[band_index].total_weight -= taken.weight;

    if bands[band_index].members.is_empty() {
        bands.remove(band_index);
    }

    for band in &mut bands[band_index..] {
        band.cumulative_weight -= taken.weight;
    }

    Some(taken)
}
