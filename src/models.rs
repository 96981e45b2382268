//! Order attribute enums and reject reasons
//!
//! Closed enums with fixed u8 wire codes. Decoding an unknown code is a soft
//! error at the codec layer (log + drop the frame), never a crash.

/// Order side. Wire codes: BUY=1, SELL=2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Side {
    Buy = 1,
    Sell = 2,
}

impl Side {
    #[inline]
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Buy),
            2 => Some(Self::Sell),
            _ => None,
        }
    }

    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// The opposing book side.
    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

/// Time in force. Wire codes: GTC=1, IOC=2.
///
/// GTC rests any unfilled remainder; IOC drops it silently (no reject - the
/// absence of further acks is the signal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TimeInForce {
    Gtc = 1,
    Ioc = 2,
}

impl TimeInForce {
    #[inline]
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Gtc),
            2 => Some(Self::Ioc),
            _ => None,
        }
    }

    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Reason carried on a REJECT message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RejectReason {
    Unknown = 0,
    /// Client sequence number at or below the last accepted one
    DuplicateSeqNo = 1,
    /// Client sequence number ahead of the expected one
    SeqNoGap = 2,
    /// Transport backpressure or pool exhaustion
    SystemBusy = 3,
    /// Cancel for an id not resting in the book
    OrderNotFound = 4,
    InvalidPrice = 5,
    InvalidQty = 6,
    /// Non-logon traffic before logon
    SessionNotLoggedOn = 7,
}

impl RejectReason {
    #[inline]
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Unknown),
            1 => Some(Self::DuplicateSeqNo),
            2 => Some(Self::SeqNoGap),
            3 => Some(Self::SystemBusy),
            4 => Some(Self::OrderNotFound),
            5 => Some(Self::InvalidPrice),
            6 => Some(Self::InvalidQty),
            7 => Some(Self::SessionNotLoggedOn),
            _ => None,
        }
    }

    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::DuplicateSeqNo => "Duplicate sequence number",
            Self::SeqNoGap => "Sequence number gap",
            Self::SystemBusy => "System busy",
            Self::OrderNotFound => "Order not found",
            Self::InvalidPrice => "Invalid price",
            Self::InvalidQty => "Invalid quantity",
            Self::SessionNotLoggedOn => "Session not logged on",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_codes_roundtrip() {
        assert_eq!(Side::from_u8(1), Some(Side::Buy));
        assert_eq!(Side::from_u8(2), Some(Side::Sell));
        assert_eq!(Side::from_u8(0), None);
        assert_eq!(Side::from_u8(3), None);
        assert_eq!(Side::Buy.as_u8(), 1);
        assert_eq!(Side::Sell.as_u8(), 2);
    }

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }

    #[test]
    fn test_tif_codes() {
        assert_eq!(TimeInForce::from_u8(1), Some(TimeInForce::Gtc));
        assert_eq!(TimeInForce::from_u8(2), Some(TimeInForce::Ioc));
        assert_eq!(TimeInForce::from_u8(0), None);
    }

    #[test]
    fn test_reject_reason_codes() {
        for code in 0..=7u8 {
            let reason = RejectReason::from_u8(code).unwrap();
            assert_eq!(reason.as_u8(), code);
        }
        assert_eq!(RejectReason::from_u8(8), None);
        assert_eq!(RejectReason::SystemBusy.as_str(), "System busy");
    }
}
