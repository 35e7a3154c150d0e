use crate::domain::escrow::EscrowRecord;
use crate::domain::pool::PrizePool;
use crate::domain::ports::LedgerStore;
use crate::domain::prize::PrizeRecord;
use crate::domain::winner::WinnerProfile;
use crate::error::AppError;
use serde::Deserialize;
use std::io::Read;

/// Ledger documents to load before running a command.
///
/// Funding and winner finalization happen elsewhere; this is how their results
/// reach a local ledger.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSeed {
    #[serde(default)]
    pub pools: Vec<PrizePool>,
    #[serde(default)]
    pub escrows: Vec<EscrowRecord>,
    #[serde(default)]
    pub prizes: Vec<PrizeRecord>,
    #[serde(default)]
    pub winners: Vec<WinnerProfile>,
}

impl LedgerSeed {
    pub fn from_reader<R: Read>(source: R) -> Result<Self, AppError> {
        Ok(serde_json::from_reader(source)?)
    }

    /// Writes every document, overwriting any with the same id.
    pub async fn load_into(self, ledger: &dyn LedgerStore) -> Result<(), AppError> {
        for pool in self.pools {
            ledger.put_pool(pool).await?;
        }
        for escrow in self.escrows {
            ledger.put_escrow(escrow).await?;
        }
        for winner in self.winners {
            ledger.put_winner(winner).await?;
        }
        for prize in self.prizes {
            ledger.put_prize(prize).await?;
        }
        Ok(())
    }
}
