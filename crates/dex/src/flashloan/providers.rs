use async_trait::async_trait;
use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, U256};
use models::{PoolSnapshot, ProviderId, SourceError, BPS_DENOMINATOR};

/// 闪电贷提供商类型
///
/// 只是常见提供商的预置信息，聚合器按 `ProviderId` 工作，新增提供商不需要扩展此枚举。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlashLoanProvider {
    /// Uniswap V3 Flash
    UniswapV3,
    /// Uniswap V4 Flash Accounting (零成本)
    UniswapV4,
    /// Aave V3 Flash Loan
    AaveV3,
    /// Balancer Flash Loan
    Balancer,
}

impl FlashLoanProvider {
    pub const ALL: [FlashLoanProvider; 4] = [
        FlashLoanProvider::UniswapV3,
        FlashLoanProvider::UniswapV4,
        FlashLoanProvider::AaveV3,
        FlashLoanProvider::Balancer,
    ];

    /// 获取提供商名称
    pub fn name(&self) -> &'static str {
        match self {
            FlashLoanProvider::UniswapV3 => "Uniswap V3",
            FlashLoanProvider::UniswapV4 => "Uniswap V4",
            FlashLoanProvider::AaveV3 => "Aave V3",
            FlashLoanProvider::Balancer => "Balancer",
        }
    }

    /// 存储与配置中使用的键
    pub fn id(&self) -> ProviderId {
        let key = match self {
            FlashLoanProvider::UniswapV3 => "uniswap_v3",
            FlashLoanProvider::UniswapV4 => "uniswap_v4",
            FlashLoanProvider::AaveV3 => "aave_v3",
            FlashLoanProvider::Balancer => "balancer",
        };
        ProviderId::from(key)
    }

    pub fn from_id(id: &ProviderId) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.id() == *id)
    }

    /// 获取闪电贷默认费率 (以 1e6 为基数)
    ///
    /// 费率单位: 100 = 0.01%, 500 = 0.05%, 3000 = 0.3%, 10000 = 1%
    ///
    /// Uniswap V3 的闪电贷费率等于借贷池的 fee tier，这里的 3000 只是默认估算值。
    pub fn fee_rate(&self) -> u32 {
        match self {
            FlashLoanProvider::UniswapV3 => 3000,
            FlashLoanProvider::UniswapV4 => 0,      // V4 flash accounting 无费用
            FlashLoanProvider::AaveV3 => 500,       // 固定 0.05%
            FlashLoanProvider::Balancer => 0,       // Balancer flash 无费用
        }
    }

    /// 默认费率换算为基点
    pub fn default_fee_bps(&self) -> u32 {
        self.fee_rate() / 100
    }

    /// 日志中展示的名称，未知提供商直接使用其 id
    pub fn display_name(id: &ProviderId) -> &str {
        match Self::from_id(id) {
            Some(provider) => provider.name(),
            None => id.as_str(),
        }
    }
}

/// 一次成功借款的回执
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoanReceipt {
    /// 实际支付的闪电贷费用
    pub fee_paid: U256,
    pub gas_used: U256,
}

/// 闪电贷提供商接口 (由具体借贷池适配器实现)
///
/// `execute` 在回调中必须偿还 `amount + fee` 后才能返回成功。
#[async_trait]
pub trait LendingQuoteSource: Send + Sync {
    fn provider_id(&self) -> ProviderId;

    fn supports(&self, asset: Address) -> bool;

    /// 借入 `amount` 的费率 (基点)
    ///
    /// 默认按常见提供商的固定费率返回，费率随池子变化的适配器需要覆盖。
    async fn fee_bps(&self, _asset: Address, _amount: U256) -> Result<u32, SourceError> {
        FlashLoanProvider::from_id(&self.provider_id())
            .map(|provider| provider.default_fee_bps())
            .ok_or_else(|| SourceError::Unavailable("no fee schedule".to_string()))
    }

    /// 可借上限
    async fn max_amount(&self, asset: Address) -> Result<U256, SourceError>;

    fn estimated_gas(&self) -> U256;

    async fn execute(
        &self,
        asset: Address,
        amount: U256,
        payload: &Bytes,
    ) -> Result<LoanReceipt, SourceError>;
}

/// 按基点计算费用 (截断)
pub fn fee_for(amount: U256, fee_bps: u32) -> U256 {
    amount.saturating_mul(U256::from(fee_bps)) / U256::from(BPS_DENOMINATOR)
}

/// 回调中执行的单跳兑换
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackHop {
    pub token_in: Address,
    pub token_out: Address,
    pub fee_bps: u32,
}

impl CallbackHop {
    pub fn from_pools(pools: &[PoolSnapshot]) -> Vec<CallbackHop> {
        pools
            .iter()
            .map(|pool| CallbackHop {
                token_in: pool.token_in,
                token_out: pool.token_out,
                fee_bps: pool.fee_rate_bps,
            })
            .collect()
    }
}

/// 编码闪电贷回调数据: `((address,address,uint24)[], uint256 minProfit)`
pub fn encode_callback_data(hops: &[CallbackHop], min_profit: U256) -> Bytes {
    let path_tokens: Vec<Token> = hops
        .iter()
        .map(|hop| {
            Token::Tuple(vec![
                Token::Address(hop.token_in),
                Token::Address(hop.token_out),
                Token::Uint(hop.fee_bps.into()),
            ])
        })
        .collect();

    let encoded = encode(&[Token::Array(path_tokens), Token::Uint(min_profit)]);
    Bytes::from(encoded)
}
