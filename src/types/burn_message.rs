//! Circle CCTP burn message parsing.

use alloy_primitives::{Address, B256, U256};

// BurnMessage layout (TokenMessenger BurnMessage.sol):
// - Bytes 0-3: message body version (4 bytes, big-endian uint32)
// - Bytes 4-35: burn token (32 bytes)
// - Bytes 36-67: mint recipient (32 bytes)
// - Bytes 68-99: amount (32 bytes, big-endian uint256)
// - Bytes 100-131: message sender (32 bytes)
const VERSION_INDEX: usize = 0;
const BURN_TOKEN_INDEX: usize = 4;
const MINT_RECIPIENT_INDEX: usize = 36;
const AMOUNT_INDEX: usize = 68;
const MESSAGE_SENDER_INDEX: usize = 100;

/// Exact length of a CCTP burn message body.
pub const BURN_MESSAGE_LEN: usize = 132;

#[derive(Debug, thiserror::Error)]
pub enum BurnMessageError {
    #[error("burn message must be {BURN_MESSAGE_LEN} bytes, got {length}")]
    UnexpectedLength { length: usize },
}

/// Decoded body of a CCTP burn/mint message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurnMessage {
    pub version: u32,
    pub burn_token: B256,
    /// Mint recipient, left-padded to 32 bytes on EVM chains.
    pub mint_recipient: B256,
    pub amount: U256,
    /// Depositor that initiated the burn, left-padded to 32 bytes.
    pub message_sender: B256,
}

impl BurnMessage {
    /// Parses a message body as a burn message. Bodies of any other length
    /// (including v2 metadata messages) are rejected.
    pub fn parse(body: &[u8]) -> Result<Self, BurnMessageError> {
        if body.len() != BURN_MESSAGE_LEN {
            return Err(BurnMessageError::UnexpectedLength { length: body.len() });
        }

        let mut version_bytes = [0u8; 4];
        version_bytes.copy_from_slice(&body[VERSION_INDEX..BURN_TOKEN_INDEX]);

        Ok(Self {
            version: u32::from_be_bytes(version_bytes),
            burn_token: B256::from_slice(&body[BURN_TOKEN_INDEX..MINT_RECIPIENT_INDEX]),
            mint_recipient: B256::from_slice(&body[MINT_RECIPIENT_INDEX..AMOUNT_INDEX]),
            amount: U256::from_be_slice(&body[AMOUNT_INDEX..MESSAGE_SENDER_INDEX]),
            message_sender: B256::from_slice(&body[MESSAGE_SENDER_INDEX..BURN_MESSAGE_LEN]),
        })
    }

    /// The depositor as an EVM address: the last 20 bytes of the 32-byte
    /// sender field.
    pub fn depositor(&self) -> Address {
        Address::from_slice(&self.message_sender.as_slice()[12..])
    }

    /// Encodes the message back to its 132-byte wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BURN_MESSAGE_LEN);
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(self.burn_token.as_slice());
        out.extend_from_slice(self.mint_recipient.as_slice());
        out.extend_from_slice(&self.amount.to_be_bytes::<32>());
        out.extend_from_slice(self.message_sender.as_slice());
        out
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{address, b256};
    use proptest::prelude::*;

    use super::*;

    fn sample() -> BurnMessage {
        BurnMessage {
            version: 0,
            burn_token: b256!("0000000000000000000000001111111111111111111111111111111111111111"),
            mint_recipient: b256!(
                "000000000000000000000000aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
            ),
            amount: U256::from(1_000_000u64),
            message_sender: b256!(
                "000000000000000000000000bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"
            ),
        }
    }

    #[test]
    fn parse_roundtrips_encode() {
        let msg = sample();
        let parsed = BurnMessage::parse(&msg.encode()).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn parse_rejects_short_body() {
        let err = BurnMessage::parse(&[0u8; BURN_MESSAGE_LEN - 1]).unwrap_err();
        assert!(matches!(
            err,
            BurnMessageError::UnexpectedLength { length } if length == BURN_MESSAGE_LEN - 1
        ));
    }

    #[test]
    fn parse_rejects_long_body() {
        BurnMessage::parse(&[0u8; BURN_MESSAGE_LEN + 32]).unwrap_err();
    }

    #[test]
    fn parse_rejects_empty_body() {
        let err = BurnMessage::parse(&[]).unwrap_err();
        assert!(matches!(
            err,
            BurnMessageError::UnexpectedLength { length: 0 }
        ));
    }

    #[test]
    fn depositor_takes_last_twenty_bytes_of_sender() {
        let msg = sample();
        assert_eq!(
            msg.depositor(),
            address!("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb")
        );
    }

    proptest! {
        #[test]
        fn encode_parse_roundtrip(
            version in any::<u32>(),
            burn_token in any::<[u8; 32]>(),
            mint_recipient in any::<[u8; 32]>(),
            amount in any::<[u8; 32]>(),
            message_sender in any::<[u8; 32]>(),
        ) {
            let msg = BurnMessage {
                version,
                burn_token: B256::from(burn_token),
                mint_recipient: B256::from(mint_recipient),
                amount: U256::from_be_bytes(amount),
                message_sender: B256::from(message_sender),
            };
            let parsed = BurnMessage::parse(&msg.encode()).unwrap();
            prop_assert_eq!(parsed, msg);
        }

        #[test]
        fn wrong_lengths_always_fail(len in (0usize..400).prop_filter(
            "exclude the valid length", |l| *l != BURN_MESSAGE_LEN
        )) {
            prop_assert!(BurnMessage::parse(&vec![0u8; len]).is_err());
        }
    }
}
