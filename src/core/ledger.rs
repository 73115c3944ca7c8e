use super::config::{AccountConfig, AccountKind, TaxRules};
use super::error::{SimError, SimResult};
use super::types::AccountBalance;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Withdrawal {
    pub cash: f64,
    pub taxable_gain: f64,
    pub taxable_income: f64,
    pub tax_free: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContributionContext {
    pub employee: f64,
    pub employer: f64,
    pub tax_relief: f64,
    /// Pension annual allowance still unused this year. Ignored by other kinds.
    pub allowance_remaining: f64,
}

impl ContributionContext {
    pub fn personal(amount: f64) -> Self {
        Self {
            employee: amount,
            employer: 0.0,
            tax_relief: 0.0,
            allowance_remaining: f64::INFINITY,
        }
    }

    pub fn total(&self) -> f64 {
        self.employee + self.employer + self.tax_relief
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ContributionReceipt {
    pub balance: f64,
    pub allowance_used: f64,
    pub allowance_excess: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PensionTally {
    pub employee: f64,
    pub employer: f64,
    pub tax_relief: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub kind: AccountKind,
    pub name: String,
    pub mean_return: f64,
    pub std_dev_return: f64,
    balance: f64,
    cost_basis: f64,
    tax_free_remaining: Option<f64>,
    pension_tally: PensionTally,
    accrued_interest: f64,
}

impl Account {
    pub fn from_config(config: &AccountConfig) -> Self {
        let balance = config.balance.max(0.0);
        let cost_basis = match config.kind {
            AccountKind::Gia => config.cost_basis.unwrap_or(balance).max(0.0),
            _ => 0.0,
        };
        Self {
            kind: config.kind,
            name: config.display_name(),
            mean_return: config.mean_return,
            std_dev_return: config.std_dev_return,
            balance,
            cost_basis,
            tax_free_remaining: None,
            pension_tally: PensionTally::default(),
            accrued_interest: 0.0,
        }
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn cost_basis(&self) -> f64 {
        self.cost_basis
    }

    pub fn unrealised_gain(&self) -> f64 {
        (self.balance - self.cost_basis).max(0.0)
    }

    /// `None` until the pot is first drawn.
    pub fn tax_free_remaining(&self) -> Option<f64> {
        self.tax_free_remaining
    }

    pub fn pension_tally(&self) -> PensionTally {
        self.pension_tally
    }

    pub fn apply_annual_return(&mut self, rate: f64) -> f64 {
        let rate = rate.max(-1.0);
        let growth = self.balance * rate;
        self.balance = (self.balance + growth).max(0.0);
        if self.kind == AccountKind::FixedInterest && growth > 0.0 {
            self.accrued_interest += growth;
        }
        self.balance
    }

    pub fn take_accrued_interest(&mut self) -> f64 {
        std::mem::take(&mut self.accrued_interest)
    }

    pub fn preview_withdrawal(&self, amount: f64, rules: &TaxRules) -> SimResult<Withdrawal> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(SimError::numerical(format!(
                "{}: withdrawal must be a non-negative amount, got {amount}",
                self.name
            )));
        }
        if amount > self.balance {
            return Err(SimError::numerical(format!(
                "{}: withdrawal of {amount:.2} exceeds balance {:.2}",
                self.name, self.balance
            )));
        }
        if amount == 0.0 {
            return Ok(Withdrawal::default());
        }

        let withdrawal = match self.kind {
            AccountKind::Gia => {
                let basis_portion = (self.cost_basis * (amount / self.balance)).min(self.cost_basis);
                Withdrawal {
                    cash: amount,
                    taxable_gain: (amount - basis_portion).max(0.0),
                    ..Withdrawal::default()
                }
            }
            AccountKind::Pension => {
                let tax_free_pool = self
                    .tax_free_remaining
                    .unwrap_or_else(|| crystallised_tax_free(self.balance, rules));
                let tax_free = amount.min(tax_free_pool);
                Withdrawal {
                    cash: amount,
                    taxable_income: amount - tax_free,
                    tax_free,
                    ..Withdrawal::default()
                }
            }
            AccountKind::Isa | AccountKind::FixedInterest | AccountKind::Cash => Withdrawal {
                cash: amount,
                tax_free: amount,
                ..Withdrawal::default()
            },
        };
        Ok(withdrawal)
    }

    pub fn withdraw(&mut self, amount: f64, rules: &TaxRules) -> SimResult<Withdrawal> {
        let withdrawal = self.preview_withdrawal(amount, rules)?;
        if amount == 0.0 {
            return Ok(withdrawal);
        }

        match self.kind {
            AccountKind::Gia => {
                let basis_portion = (self.cost_basis * (amount / self.balance)).min(self.cost_basis);
                self.cost_basis = (self.cost_basis - basis_portion).max(0.0);
            }
            AccountKind::Pension => {
                let pool = self
                    .tax_free_remaining
                    .unwrap_or_else(|| crystallised_tax_free(self.balance, rules));
                self.tax_free_remaining = Some((pool - withdrawal.tax_free).max(0.0));
            }
            _ => {}
        }

        self.balance = (self.balance - amount).max(0.0);
        Ok(withdrawal)
    }

    pub fn contribute(&mut self, context: ContributionContext) -> SimResult<ContributionReceipt> {
        for (label, value) in [
            ("employee", context.employee),
            ("employer", context.employer),
            ("tax relief", context.tax_relief),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(SimError::numerical(format!(
                    "{}: {label} contribution must be >= 0, got {value}",
                    self.name
                )));
            }
        }

        let amount = context.total();
        self.balance += amount;

        let mut receipt = ContributionReceipt {
            balance: self.balance,
            ..ContributionReceipt::default()
        };

        match self.kind {
            AccountKind::Gia => self.cost_basis += amount,
            AccountKind::Pension => {
                let allowance = context.allowance_remaining.max(0.0);
                receipt.allowance_used = amount.min(allowance);
                receipt.allowance_excess = (amount - allowance).max(0.0);
                self.pension_tally.employee += context.employee;
                self.pension_tally.employer += context.employer;
                self.pension_tally.tax_relief += context.tax_relief;
            }
            _ => {}
        }

        Ok(receipt)
    }

    /// Sells and immediately rebuys enough of a GIA holding to realise gains up
    /// to `exempt_remaining`, stepping the cost basis up. Returns the gain realised.
    pub fn harvest_gains(&mut self, exempt_remaining: f64) -> SimResult<f64> {
        if self.kind != AccountKind::Gia {
            return Ok(0.0);
        }
        if !exempt_remaining.is_finite() || exempt_remaining < 0.0 {
            return Err(SimError::numerical(format!(
                "{}: exempt amount must be >= 0, got {exempt_remaining}",
                self.name
            )));
        }

        let realised = self.unrealised_gain().min(exempt_remaining);
        self.cost_basis += realised;
        Ok(realised)
    }

    pub fn snapshot(&self) -> AccountBalance {
        AccountBalance {
            name: self.name.clone(),
            kind: self.kind,
            balance: self.balance,
        }
    }
}

fn crystallised_tax_free(balance: f64, rules: &TaxRules) -> f64 {
    (balance * rules.pension_tax_free_fraction).min(rules.lump_sum_allowance)
}

/// Every invested pot of one simulated life. Slot order follows the configured
/// account order with cash entries removed; return vectors are indexed the same way.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetLedger {
    accounts: Vec<Account>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CashSeed {
    pub balance: f64,
    pub interest_rate: f64,
}

impl AssetLedger {
    pub fn from_configs(configs: &[AccountConfig]) -> (Self, CashSeed) {
        let mut accounts = Vec::new();
        let mut cash = CashSeed::default();
        let mut weighted_rate = 0.0;

        for config in configs {
            if config.kind == AccountKind::Cash {
                cash.balance += config.balance.max(0.0);
                weighted_rate += config.balance.max(0.0) * config.mean_return;
            } else {
                accounts.push(Account::from_config(config));
            }
        }

        if cash.balance > 0.0 {
            cash.interest_rate = weighted_rate / cash.balance;
        } else if let Some(first) = configs.iter().find(|c| c.kind == AccountKind::Cash) {
            cash.interest_rate = first.mean_return;
        }

        (Self { accounts }, cash)
    }

    pub fn slot_count(&self) -> usize {
        self.accounts.len()
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn account(&self, slot: usize) -> Option<&Account> {
        self.accounts.get(slot)
    }

    pub fn account_mut(&mut self, slot: usize) -> Option<&mut Account> {
        self.accounts.get_mut(slot)
    }

    pub fn slots_of(&self, kind: AccountKind) -> Vec<usize> {
        self.accounts
            .iter()
            .enumerate()
            .filter(|(_, account)| account.kind == kind)
            .map(|(slot, _)| slot)
            .collect()
    }

    pub fn balance_of(&self, kind: AccountKind) -> f64 {
        self.accounts
            .iter()
            .filter(|account| account.kind == kind)
            .map(Account::balance)
            .sum()
    }

    pub fn total(&self) -> f64 {
        self.accounts.iter().map(Account::balance).sum()
    }

    pub fn take_accrued_interest(&mut self) -> f64 {
        self.accounts
            .iter_mut()
            .map(Account::take_accrued_interest)
            .sum()
    }

    pub fn snapshot(&self) -> Vec<AccountBalance> {
        self.accounts.iter().map(Account::snapshot).collect()
    }
}
