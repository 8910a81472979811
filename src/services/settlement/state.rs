//! Settlement states for send-money transactions and deposits.
//!
//! The overall transaction status is never decided on its own: it is always
//! computed from the three stage statuses by [`derive_status`] and stored
//! alongside them for querying.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Legacy rows created before collection was requested
    Pending,
    CollectionPending,
    ProcessingDistribution,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::CollectionPending => "collection_pending",
            TransactionStatus::ProcessingDistribution => "processing_distribution",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn from_db(status: &str) -> Option<Self> {
        match status {
            "pending" => Some(TransactionStatus::Pending),
            "collection_pending" => Some(TransactionStatus::CollectionPending),
            "processing_distribution" => Some(TransactionStatus::ProcessingDistribution),
            "completed" => Some(TransactionStatus::Completed),
            "failed" => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Completed | TransactionStatus::Failed)
    }

    /// Statuses in which the PSP still owes us a collection verdict.
    pub fn awaiting_collection() -> &'static [TransactionStatus] {
        &[
            TransactionStatus::Pending,
            TransactionStatus::CollectionPending,
        ]
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStage {
    Pending,
    Collected,
    Failed,
    /// No verdict from the PSP within the retry budget or the wall-clock limit
    Timeout,
}

impl CollectionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionStage::Pending => "pending",
            CollectionStage::Collected => "collected",
            CollectionStage::Failed => "failed",
            CollectionStage::Timeout => "timeout",
        }
    }

    pub fn from_db(status: &str) -> Option<Self> {
        match status {
            "pending" => Some(CollectionStage::Pending),
            "collected" => Some(CollectionStage::Collected),
            "failed" => Some(CollectionStage::Failed),
            "timeout" => Some(CollectionStage::Timeout),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InvestmentStage {
    Pending,
    Allocated,
    Failed,
    /// Nothing to allocate (zero investment percentage)
    Skipped,
}

impl InvestmentStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvestmentStage::Pending => "pending",
            InvestmentStage::Allocated => "allocated",
            InvestmentStage::Failed => "failed",
            InvestmentStage::Skipped => "skipped",
        }
    }

    pub fn from_db(status: &str) -> Option<Self> {
        match status {
            "pending" => Some(InvestmentStage::Pending),
            "allocated" => Some(InvestmentStage::Allocated),
            "failed" => Some(InvestmentStage::Failed),
            "skipped" => Some(InvestmentStage::Skipped),
            _ => None,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, InvestmentStage::Allocated | InvestmentStage::Skipped)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStage {
    Pending,
    Delivered,
    Failed,
}

impl DeliveryStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStage::Pending => "pending",
            DeliveryStage::Delivered => "delivered",
            DeliveryStage::Failed => "failed",
        }
    }

    pub fn from_db(status: &str) -> Option<Self> {
        match status {
            "pending" => Some(DeliveryStage::Pending),
            "delivered" => Some(DeliveryStage::Delivered),
            "failed" => Some(DeliveryStage::Failed),
            _ => None,
        }
    }
}

/// Overall status as a pure function of the stage statuses.
pub fn derive_status(
    collection: CollectionStage,
    investment: InvestmentStage,
    delivery: DeliveryStage,
) -> TransactionStatus {
    match collection {
        CollectionStage::Pending => TransactionStatus::CollectionPending,
        CollectionStage::Failed | CollectionStage::Timeout => TransactionStatus::Failed,
        CollectionStage::Collected => {
            if investment.is_settled() && delivery == DeliveryStage::Delivered {
                TransactionStatus::Completed
            } else {
                TransactionStatus::ProcessingDistribution
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    Pending,
    Initiated,
    Collected,
    Failed,
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::Pending => "pending",
            DepositStatus::Initiated => "initiated",
            DepositStatus::Collected => "collected",
            DepositStatus::Failed => "failed",
        }
    }

    pub fn from_db(status: &str) -> Option<Self> {
        match status {
            "pending" => Some(DepositStatus::Pending),
            "initiated" => Some(DepositStatus::Initiated),
            "collected" | "success" => Some(DepositStatus::Collected),
            "failed" => Some(DepositStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DepositStatus::Collected | DepositStatus::Failed)
    }

    pub fn awaiting_collection() -> &'static [DepositStatus] {
        &[DepositStatus::Initiated, DepositStatus::Pending]
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Timeout,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Queued => "queued",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
            QueueStatus::Timeout => "timeout",
        }
    }

    pub fn from_db(status: &str) -> Option<Self> {
        match status {
            "queued" => Some(QueueStatus::Queued),
            "processing" => Some(QueueStatus::Processing),
            "completed" => Some(QueueStatus::Completed),
            "failed" => Some(QueueStatus::Failed),
            "timeout" => Some(QueueStatus::Timeout),
            _ => None,
        }
    }

    pub fn awaiting_collection() -> &'static [QueueStatus] {
        &[QueueStatus::Queued, QueueStatus::Processing]
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum DonationChoice {
    #[default]
    None,
    /// Donate the investment portion
    Profit,
    /// Donate the full amount
    Both,
}

impl DonationChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            DonationChoice::None => "none",
            DonationChoice::Profit => "profit",
            DonationChoice::Both => "both",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "" | "none" => Some(DonationChoice::None),
            "profit" => Some(DonationChoice::Profit),
            "both" => Some(DonationChoice::Both),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecipientType {
    MobileMoney,
    CryptoWallet,
    StellarWallet,
    PlatformWallet,
}

impl RecipientType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientType::MobileMoney => "mobile_money",
            RecipientType::CryptoWallet => "crypto_wallet",
            RecipientType::StellarWallet => "stellar_wallet",
            RecipientType::PlatformWallet => "platform_wallet",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "mobile_money" => Some(RecipientType::MobileMoney),
            "crypto_wallet" => Some(RecipientType::CryptoWallet),
            "stellar_wallet" => Some(RecipientType::StellarWallet),
            "platform_wallet" | "siha_wallet" => Some(RecipientType::PlatformWallet),
            _ => None,
        }
    }
}
