/// KV key layout. Outside production every key is prefixed with
/// `{environment}:` so shared stores don't collide across deployments.
#[derive(Debug, Clone)]
pub struct Keyspace {
    prefix: String,
}

impl Keyspace {
    pub fn new(environment: &str) -> Self {
        let prefix = if environment == "production" {
            String::new()
        } else {
            format!("{environment}:")
        };
        Self { prefix }
    }

    pub fn user_subscriptions(&self, user_id: &str) -> String {
        format!("{}sub:user:{user_id}", self.prefix)
    }

    pub fn kol_active(&self) -> String {
        format!("{}kol:active", self.prefix)
    }

    pub fn kol_subscribers(&self, kol_wallet: &str) -> String {
        format!("{}kol:subscribers:{kol_wallet}", self.prefix)
    }

    pub fn trade_detail(&self, kol_wallet: &str, trade_id: &uuid::Uuid) -> String {
        format!("{}trade:kol:{kol_wallet}:{trade_id}", self.prefix)
    }

    pub fn trade_recent_for_kol(&self, kol_wallet: &str) -> String {
        format!("{}trade:recent:{kol_wallet}", self.prefix)
    }

    pub fn trade_recent_global(&self) -> String {
        format!("{}trade:recent", self.prefix)
    }

    pub fn metrics_current(&self) -> String {
        format!("{}metrics:current", self.prefix)
    }

    pub fn metrics_counter(&self, name: &str) -> String {
        format!("{}metrics:counter:{name}", self.prefix)
    }

    pub fn token_buy_count(&self, user_id: &str, token_mint: &str) -> String {
        format!("{}token_purchases:token_buy_count:{user_id}:{token_mint}", self.prefix)
    }

    pub fn token_purchase_record(&self, user_id: &str, token_mint: &str) -> String {
        format!("{}token_purchases:token_purchase_record:{user_id}:{token_mint}", self.prefix)
    }
}
