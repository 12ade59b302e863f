//! Event signature registry.
//!
//! Maps a topic-0 hash to the [`EventKind`] whose decoder applies. A signature
//! belongs to exactly one kind; registering it under a second kind fails.
//!
//! The topic-0 of an EVM event is the keccak256 of its canonical signature:
//!   keccak256("Transfer(address,address,uint256)")
//!   → 0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef

use alloy_primitives::{b256, B256};
use std::collections::HashMap;
use tiny_keccak::{Hasher, Keccak};

use crate::error::RegistryError;
use crate::event::EventKind;

pub const ERC20_TRANSFER: B256 =
    b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");
pub const ERC20_APPROVAL: B256 =
    b256!("8c5be1e5ebec7d5bd14f71427d1e84f3dd0314c0f7b2291e5b200ac8c7c3b925");
pub const ERC721_APPROVAL_FOR_ALL: B256 =
    b256!("17307eab39ab6107e8899845ad3d59bd9653f200f220920489ca2b5937696c31");

pub const UNISWAP_SWAP: B256 =
    b256!("0d3648bd0f6ba80134a33ba9275ac585d9d315f0ad8355cddefde31afa28d0e9");
pub const UNISWAP_INITIALIZE: B256 =
    b256!("98636036cb66a9c19a37435efc1e90142190214e8abeb821bdda3f2990dd4c95");
pub const UNISWAP_MODIFY_LIQUIDITY: B256 =
    b256!("3932abb5e2165f7c78ddef6502e29c06225afc2b9a4e51ae1d80f2ed7f6ac1a0");

/// Uniswap V3: factory pool deployment and per-pool swaps. Not decoded into
/// typed events; used to discover and watch pools.
pub const UNISWAP_V3_POOL_CREATED: B256 =
    b256!("783cca1c0412dd0d695e784568c96da2e9c22ff989357a2e8b1d9b2b4e6b7118");
pub const UNISWAP_V3_SWAP: B256 =
    b256!("c42079f94a6350d7e6235f29174924f928cc2ac818eb64fed8004e115fbcca67");

/// Canonical PoolManager ABI signatures, registered alongside the fixed hashes.
pub const UNISWAP_V4_SWAP_ABI: &str =
    "Swap(bytes32,address,int128,int128,uint160,uint128,int24,uint24)";
pub const UNISWAP_V4_INITIALIZE_ABI: &str =
    "Initialize(bytes32,address,address,uint24,int24,address,uint160,int24)";
pub const UNISWAP_V4_MODIFY_LIQUIDITY_ABI: &str =
    "ModifyLiquidity(bytes32,address,int24,int24,int256,bytes32)";

/// Compute the keccak256 topic-0 of a canonical event signature string.
pub fn keccak256_signature(signature: &str) -> B256 {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(signature.as_bytes());
    hasher.finalize(&mut output);
    B256::from(output)
}

/// What a registered signature decodes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureEntry {
    pub kind: EventKind,
    /// Event name used when the subscription does not provide one.
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct EventSignatures {
    by_signature: HashMap<B256, SignatureEntry>,
}

impl EventSignatures {
    /// An empty registry. Every log decodes as generic.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in ERC-20 / ERC-721 / Uniswap V4 set.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        let fixed = [
            (ERC20_TRANSFER, EventKind::Erc20Transfer, "Transfer"),
            (ERC20_APPROVAL, EventKind::Generic, "Approval"),
            (ERC721_APPROVAL_FOR_ALL, EventKind::Generic, "ApprovalForAll"),
            (UNISWAP_SWAP, EventKind::UniswapSwap, "Swap"),
            (UNISWAP_INITIALIZE, EventKind::UniswapInitialize, "Initialize"),
            (UNISWAP_MODIFY_LIQUIDITY, EventKind::UniswapModifyLiquidity, "ModifyLiquidity"),
        ];
        for (sig, kind, name) in fixed {
            reg.by_signature.insert(
                sig,
                SignatureEntry {
                    kind,
                    name: name.to_string(),
                },
            );
        }
        let canonical = [
            (UNISWAP_V4_SWAP_ABI, EventKind::UniswapSwap, "Swap"),
            (UNISWAP_V4_INITIALIZE_ABI, EventKind::UniswapInitialize, "Initialize"),
            (
                UNISWAP_V4_MODIFY_LIQUIDITY_ABI,
                EventKind::UniswapModifyLiquidity,
                "ModifyLiquidity",
            ),
        ];
        for (abi, kind, name) in canonical {
            reg.by_signature
                .entry(keccak256_signature(abi))
                .or_insert_with(|| SignatureEntry {
                    kind,
                    name: name.to_string(),
                });
        }
        reg
    }

    /// Register `signature` as `kind`.
    ///
    /// Re-registering the same kind is a no-op; a different kind is a conflict.
    pub fn register(
        &mut self,
        signature: B256,
        kind: EventKind,
        name: impl Into<String>,
    ) -> Result<(), RegistryError> {
        if let Some(existing) = self.by_signature.get(&signature) {
            if existing.kind == kind {
                return Ok(());
            }
            return Err(RegistryError::Conflict {
                signature: signature.to_string(),
                existing: existing.kind.to_string(),
                requested: kind.to_string(),
            });
        }
        self.by_signature.insert(
            signature,
            SignatureEntry {
                kind,
                name: name.into(),
            },
        );
        Ok(())
    }

    /// Register by canonical ABI signature, e.g. `"Transfer(address,address,uint256)"`.
    /// Returns the computed topic-0.
    pub fn register_abi(&mut self, abi: &str, kind: EventKind) -> Result<B256, RegistryError> {
        let sig = keccak256_signature(abi);
        let name = abi.split('(').next().unwrap_or(abi);
        self.register(sig, kind, name)?;
        Ok(sig)
    }

    pub fn lookup(&self, signature: &B256) -> Option<&SignatureEntry> {
        self.by_signature.get(signature)
    }

    /// The decoder kind for `signature`; unknown signatures are generic.
    pub fn kind_of(&self, signature: &B256) -> EventKind {
        self.lookup(signature).map_or(EventKind::Generic, |e| e.kind)
    }

    /// All signatures registered for `kind`.
    pub fn signatures_for(&self, kind: EventKind) -> Vec<B256> {
        let mut sigs: Vec<B256> = self
            .by_signature
            .iter()
            .filter(|(_, e)| e.kind == kind)
            .map(|(s, _)| *s)
            .collect();
        sigs.sort();
        sigs
    }

    pub fn len(&self) -> usize {
        self.by_signature.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_signature.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erc20_transfer_fingerprint() {
        assert_eq!(
            keccak256_signature("Transfer(address,address,uint256)"),
            ERC20_TRANSFER
        );
    }

    #[test]
    fn uniswap_v3_fingerprints() {
        assert_eq!(
            keccak256_signature("PoolCreated(address,address,uint24,int24,address)"),
            UNISWAP_V3_POOL_CREATED
        );
        assert_eq!(
            keccak256_signature("Swap(address,address,int256,int256,uint160,uint128,int24)"),
            UNISWAP_V3_SWAP
        );
    }

    #[test]
    fn defaults_resolve_kinds() {
        let reg = EventSignatures::with_defaults();
        assert_eq!(reg.kind_of(&ERC20_TRANSFER), EventKind::Erc20Transfer);
        assert_eq!(reg.kind_of(&UNISWAP_SWAP), EventKind::UniswapSwap);
        assert_eq!(reg.kind_of(&ERC20_APPROVAL), EventKind::Generic);
        assert_eq!(reg.kind_of(&B256::repeat_byte(0x42)), EventKind::Generic);
        assert_eq!(
            reg.kind_of(&keccak256_signature(UNISWAP_V4_SWAP_ABI)),
            EventKind::UniswapSwap
        );
        assert_eq!(reg.lookup(&ERC20_APPROVAL).unwrap().name, "Approval");
    }

    #[test]
    fn conflicting_kind_rejected() {
        let mut reg = EventSignatures::with_defaults();
        let err = reg
            .register(ERC20_TRANSFER, EventKind::UniswapSwap, "Swap")
            .unwrap_err();
        assert!(matches!(err, RegistryError::Conflict { .. }));
        // Same kind again is accepted.
        reg.register(ERC20_TRANSFER, EventKind::Erc20Transfer, "Transfer")
            .unwrap();
    }

    #[test]
    fn register_abi_uses_keccak() {
        let mut reg = EventSignatures::new();
        let sig = reg
            .register_abi("Transfer(address,address,uint256)", EventKind::Erc20Transfer)
            .unwrap();
        assert_eq!(sig, ERC20_TRANSFER);
        assert_eq!(reg.lookup(&sig).unwrap().name, "Transfer");
        assert_eq!(reg.signatures_for(EventKind::Erc20Transfer), vec![sig]);
    }
}
