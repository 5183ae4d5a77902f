use std::fmt::{Display, Formatter};
use num_enum::{IntoPrimitive, TryFromPrimitive};

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum Timeliness {
    Unspecified = 0,
    Realtime = 1,
    /// delayed by an amount of time that is not known
    DelayedUnknown = 2,
    /// delayed by the number of seconds in [Qos::time_info]
    Delayed = 3,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum Rate {
    Unspecified = 0,
    TickByTick = 1,
    /// conflated as needed to keep up with the consumer ('just in time')
    JitConflated = 2,
    /// conflated to one update per [Qos::rate_info] milliseconds
    TimeConflated = 3,
}

/// A quality of service, i.e. how fresh and how frequent data on a stream is.
///
/// The `dynamic` flag is a negotiation attribute rather than a property of the data: a dynamic
///  QoS may be changed by the provider during the stream's lifetime. It is ignored when comparing
///  quality with [Qos::is_better] or [Qos::same_quality].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Qos {
    pub timeliness: Timeliness,
    pub rate: Rate,
    pub dynamic: bool,
    pub time_info: u16,
    pub rate_info: u16,
}

impl Display for Qos {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Timeliness: {}, Rate: {}", u8::from(self.timeliness), u8::from(self.rate))
    }
}

impl Qos {
    /// the QoS a service implicitly supports if it does not advertise any
    pub const REALTIME_TICK_BY_TICK: Qos = Qos::new(Timeliness::Realtime, Rate::TickByTick);

    pub const fn new(timeliness: Timeliness, rate: Rate) -> Qos {
        Qos {
            timeliness,
            rate,
            dynamic: false,
            time_info: 0,
            rate_info: 0,
        }
    }

    pub const fn delayed(time_info_seconds: u16, rate: Rate) -> Qos {
        Qos {
            timeliness: Timeliness::Delayed,
            rate,
            dynamic: false,
            time_info: time_info_seconds,
            rate_info: 0,
        }
    }

    pub fn with_rate_info(mut self, rate_info: u16) -> Qos {
        self.rate_info = rate_info;
        self
    }

    pub fn with_dynamic(mut self, dynamic: bool) -> Qos {
        self.dynamic = dynamic;
        self
    }

    /// A QoS with unspecified timeliness or rate can not be requested or negotiated.
    pub fn is_specified(&self) -> bool {
        self.timeliness != Timeliness::Unspecified && self.rate != Rate::Unspecified
    }

    /// lower is better
    fn timeliness_rank(&self) -> (u8, u16) {
        match self.timeliness {
            Timeliness::Realtime => (0, 0),
            Timeliness::Delayed => (1, self.time_info),
            Timeliness::DelayedUnknown => (2, 0),
            Timeliness::Unspecified => (3, 0),
        }
    }

    /// lower is better
    fn rate_rank(&self) -> (u8, u16) {
        match self.rate {
            Rate::TickByTick => (0, 0),
            Rate::JitConflated => (1, 0),
            Rate::TimeConflated => (2, self.rate_info),
            Rate::Unspecified => (3, 0),
        }
    }

    /// Timeliness takes precedence over rate.
    pub fn is_better(&self, other: &Qos) -> bool {
        match self.timeliness_rank().cmp(&other.timeliness_rank()) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Greater => false,
            std::cmp::Ordering::Equal => self.rate_rank() < other.rate_rank(),
        }
    }

    /// true iff both timeliness and rate are between `best` and `worst` (inclusive)
    pub fn is_in_range(&self, best: &Qos, worst: &Qos) -> bool {
        let t = self.timeliness_rank();
        let r = self.rate_rank();

        best.timeliness_rank() <= t && t <= worst.timeliness_rank()
            && best.rate_rank() <= r && r <= worst.rate_rank()
    }

    pub fn same_quality(&self, other: &Qos) -> bool {
        self.timeliness_rank() == other.timeliness_rank() && self.rate_rank() == other.rate_rank()
    }
}


#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;
    use Rate::*;
    use Timeliness::*;

    #[rstest]
    #[case::realtime_beats_delayed(Qos::new(Realtime, TimeConflated), Qos::delayed(5, TickByTick), true)]
    #[case::delayed_beats_realtime_not(Qos::delayed(5, TickByTick), Qos::new(Realtime, TimeConflated), false)]
    #[case::shorter_delay(Qos::delayed(5, TickByTick), Qos::delayed(6, TickByTick), true)]
    #[case::known_delay_beats_unknown(Qos::delayed(500, TickByTick), Qos::new(DelayedUnknown, TickByTick), true)]
    #[case::anything_beats_unspecified(Qos::new(DelayedUnknown, TimeConflated), Qos::new(Timeliness::Unspecified, Rate::Unspecified), true)]
    #[case::rate_decides(Qos::new(Realtime, TickByTick), Qos::new(Realtime, JitConflated), true)]
    #[case::jit_beats_time_conflated(Qos::new(Realtime, JitConflated), Qos::new(Realtime, TimeConflated), true)]
    #[case::lower_rate_info(Qos::new(Realtime, TimeConflated).with_rate_info(100), Qos::new(Realtime, TimeConflated).with_rate_info(1000), true)]
    #[case::equal(Qos::new(Realtime, TickByTick), Qos::new(Realtime, TickByTick), false)]
    #[case::dynamic_ignored(Qos::new(Realtime, TickByTick).with_dynamic(true), Qos::new(Realtime, TickByTick), false)]
    fn test_is_better(#[case] qos: Qos, #[case] other: Qos, #[case] expected: bool) {
        assert_eq!(qos.is_better(&other), expected);
    }

    #[rstest]
    #[case::best(Qos::new(Realtime, TickByTick), true)]
    #[case::worst(Qos::delayed(10, TimeConflated).with_rate_info(500), true)]
    #[case::between(Qos::delayed(3, JitConflated), true)]
    #[case::too_slow(Qos::delayed(11, TickByTick), false)]
    #[case::unknown_delay(Qos::new(DelayedUnknown, TickByTick), false)]
    #[case::too_conflated(Qos::new(Realtime, TimeConflated).with_rate_info(501), false)]
    #[case::unspecified(Qos::new(Timeliness::Unspecified, Rate::Unspecified), false)]
    fn test_is_in_range(#[case] qos: Qos, #[case] expected: bool) {
        let best = Qos::new(Realtime, TickByTick);
        let worst = Qos::delayed(10, TimeConflated).with_rate_info(500);
        assert_eq!(qos.is_in_range(&best, &worst), expected);
    }

    #[test]
    fn test_display() {
        assert_eq!(Qos::delayed(3, JitConflated).to_string(), "Timeliness: 3, Rate: 2");
    }
}
