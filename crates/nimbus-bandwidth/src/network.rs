//! Network quality classification
//!
//! Maps an observed [`NetworkStatus`] onto a five-step quality ladder whose
//! factor scales the configured bandwidth limits when auto-throttling is
//! on. A metered connection is demoted one step: the link may be fast, but
//! the user is paying per byte.

use nimbus_core::ports::{NetworkStatus, NetworkType};

/// Quality ladder driving the auto-throttle factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NetworkQuality {
    Unavailable,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl NetworkQuality {
    /// Fraction of the configured limit this quality grants
    pub fn factor(&self) -> f64 {
        match self {
            Self::Excellent => 1.0,
            Self::Good => 0.75,
            Self::Fair => 0.5,
            Self::Poor => 0.25,
            Self::Unavailable => 0.0,
        }
    }

    /// One step down the ladder
    pub fn demoted(&self) -> Self {
        match self {
            Self::Excellent => Self::Good,
            Self::Good => Self::Fair,
            Self::Fair => Self::Poor,
            Self::Poor | Self::Unavailable => Self::Unavailable,
        }
    }

    /// Classifies an observed network condition
    pub fn from_status(status: &NetworkStatus) -> Self {
        if !status.reachable {
            return Self::Unavailable;
        }
        let base = match status.network_type {
            NetworkType::Ethernet => Self::Excellent,
            NetworkType::Wifi => Self::Good,
            NetworkType::Cellular | NetworkType::Other => Self::Fair,
            NetworkType::Unknown => Self::Poor,
        };
        if status.metered {
            base.demoted()
        } else {
            base
        }
    }
}

impl std::fmt::Display for NetworkQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
            Self::Unavailable => "unavailable",
        };
        write!(f, "{name}")
    }
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factors_descend_the_ladder() {
        assert_eq!(NetworkQuality::Excellent.factor(), 1.0);
        assert_eq!(NetworkQuality::Good.factor(), 0.75);
        assert_eq!(NetworkQuality::Fair.factor(), 0.5);
        assert_eq!(NetworkQuality::Poor.factor(), 0.25);
        assert_eq!(NetworkQuality::Unavailable.factor(), 0.0);
    }

    #[test]
    fn test_interface_classification() {
        assert_eq!(
            NetworkQuality::from_status(&NetworkStatus::reachable(NetworkType::Ethernet)),
            NetworkQuality::Excellent
        );
        assert_eq!(
            NetworkQuality::from_status(&NetworkStatus::reachable(NetworkType::Wifi)),
            NetworkQuality::Good
        );
        assert_eq!(
            NetworkQuality::from_status(&NetworkStatus::reachable(NetworkType::Cellular)),
            NetworkQuality::Fair
        );
    }

    #[test]
    fn test_metered_demotes_one_step() {
        let mut status = NetworkStatus::reachable(NetworkType::Wifi);
        status.metered = true;
        assert_eq!(NetworkQuality::from_status(&status), NetworkQuality::Fair);
    }

    #[test]
    fn test_unreachable_is_unavailable_regardless_of_type() {
        let mut status = NetworkStatus::reachable(NetworkType::Ethernet);
        status.reachable = false;
        assert_eq!(
            NetworkQuality::from_status(&status),
            NetworkQuality::Unavailable
        );
    }

    #[test]
    fn test_demotion_saturates_at_unavailable() {
        assert_eq!(
            NetworkQuality::Unavailable.demoted(),
            NetworkQuality::Unavailable
        );
    }
}
