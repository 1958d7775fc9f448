use chrono::{DateTime, Utc};
use ethers::abi::{encode, Token};
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use serde::Serialize;

/// 本金来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FundingMode {
    /// 闪电贷借入本金
    FlashLoan,
    /// 自有资金
    SelfFunded,
}

impl FundingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FundingMode::FlashLoan => "flash_loan",
            FundingMode::SelfFunded => "self_funded",
        }
    }

    fn code(&self) -> u8 {
        match self {
            FundingMode::FlashLoan => 0,
            FundingMode::SelfFunded => 1,
        }
    }
}

/// 套利意图
///
/// 创建后不可变，`id` 是全部字段加签发时间的内容哈希，用于拒绝重复提交。
#[derive(Debug, Clone, Serialize)]
pub struct ArbitrageIntent {
    id: H256,
    token_in: Address,
    token_out: Address,
    amount: U256,
    min_profit: U256,
    max_slippage_bps: u32,
    deadline: DateTime<Utc>,
    caller_id: Address,
    funding: FundingMode,
    issued_at: DateTime<Utc>,
}

impl ArbitrageIntent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        token_in: Address,
        token_out: Address,
        amount: U256,
        min_profit: U256,
        max_slippage_bps: u32,
        deadline: DateTime<Utc>,
        caller_id: Address,
        funding: FundingMode,
        issued_at: DateTime<Utc>,
    ) -> Self {
        let id = Self::content_hash(
            token_in,
            token_out,
            amount,
            min_profit,
            max_slippage_bps,
            deadline,
            caller_id,
            funding,
            issued_at,
        );

        Self {
            id,
            token_in,
            token_out,
            amount,
            min_profit,
            max_slippage_bps,
            deadline,
            caller_id,
            funding,
            issued_at,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn content_hash(
        token_in: Address,
        token_out: Address,
        amount: U256,
        min_profit: U256,
        max_slippage_bps: u32,
        deadline: DateTime<Utc>,
        caller_id: Address,
        funding: FundingMode,
        issued_at: DateTime<Utc>,
    ) -> H256 {
        let encoded = encode(&[
            Token::Address(token_in),
            Token::Address(token_out),
            Token::Uint(amount),
            Token::Uint(min_profit),
            Token::Uint(max_slippage_bps.into()),
            Token::Uint(U256::from(deadline.timestamp_millis().max(0) as u64)),
            Token::Address(caller_id),
            Token::Uint(funding.code().into()),
            Token::Uint(U256::from(issued_at.timestamp_millis().max(0) as u64)),
        ]);

        H256::from(keccak256(encoded))
    }

    pub fn id(&self) -> H256 {
        self.id
    }

    /// 日志用的短 id (前 4 字节)
    pub fn short_id(&self) -> String {
        hex::encode(&self.id.as_bytes()[..4])
    }

    pub fn token_in(&self) -> Address {
        self.token_in
    }

    pub fn token_out(&self) -> Address {
        self.token_out
    }

    pub fn amount(&self) -> U256 {
        self.amount
    }

    pub fn min_profit(&self) -> U256 {
        self.min_profit
    }

    pub fn max_slippage_bps(&self) -> u32 {
        self.max_slippage_bps
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    pub fn caller_id(&self) -> Address {
        self.caller_id
    }

    pub fn funding(&self) -> FundingMode {
        self.funding
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// 截止时间已过 (`now > deadline`)
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }
}
