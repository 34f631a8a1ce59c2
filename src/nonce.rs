//! Relayer wallet nonce sequencing.
//!
//! The relayer operates a single funded wallet whose on-chain nonce must
//! increase by exactly one per broadcast, with no gaps and no reuse. The next
//! nonce is always derived from durable ledger state plus an external
//! fallback read, never from an in-process counter: once at least one relay
//! is in flight, assignment is a function of the ledger alone.

/// Computes the next relayer wallet nonce.
///
/// `latest_pending` is the highest `relayer_nonce` among `Pending` records
/// for the wallet; `on_chain` is the wallet's transaction count, read before
/// the atomic scope this is evaluated in. With a pending record the ledger
/// wins; otherwise every previously assigned nonce has settled and the chain
/// is authoritative.
pub fn next_relayer_nonce(latest_pending: Option<u64>, on_chain: u64) -> u64 {
    match latest_pending {
        Some(nonce) => nonce + 1,
        None => on_chain,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_wins_over_wallet_state() {
        assert_eq!(next_relayer_nonce(Some(41), 10), 42);
    }

    #[test]
    fn falls_back_to_on_chain_count() {
        assert_eq!(next_relayer_nonce(None, 10), 10);
        assert_eq!(next_relayer_nonce(None, 0), 0);
    }
}
