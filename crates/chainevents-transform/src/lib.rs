//! chainevents-transform: the batch path for ChainEvents.
//!
//! [`Extractor`] pulls a block range from a node into an [`ExtractedBundle`];
//! [`Transformer`] decodes it offline and aggregates it into a
//! [`TransformedBundle`] with the stable `metadata` / `transformed_blocks` /
//! `transformed_events` / `analytics` layout.

pub mod bundle;
pub mod error;
pub mod extract;
pub mod report;
pub mod transformer;

pub use bundle::{BlockSpan, ExtractedBlock, ExtractedBundle, ExtractionSummary};
pub use error::ExtractError;
pub use extract::Extractor;
pub use report::{
    Amount, Analytics, BlockReport, ContractReport, Erc20Report, GenericReport, TransferRecord,
    TransformedBundle, UniswapReport, UtilizationStatus,
};
pub use transformer::{
    transform_block, ContractClass, TransformOptions, Transformer, ERC20_ONLY_KEY,
    UNISWAP_ONLY_KEY,
};
