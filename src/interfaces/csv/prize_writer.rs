use crate::domain::prize::PrizeRecord;
use crate::error::AppError;
use serde::Serialize;
use std::io::Write;

/// Flat view of a prize record as shown to pool owners: amounts in major
/// units, no provider detail beyond the sanitized reason.
#[derive(Debug, Serialize)]
struct PrizeRow<'a> {
    prize: &'a str,
    pool: &'a str,
    payee: &'a str,
    placement: u32,
    amount: String,
    status: &'static str,
    transfer: &'a str,
    retry: bool,
    reason: &'a str,
}

impl<'a> From<&'a PrizeRecord> for PrizeRow<'a> {
    fn from(prize: &'a PrizeRecord) -> Self {
        Self {
            prize: &prize.id,
            pool: &prize.pool_id,
            payee: &prize.payee_id,
            placement: prize.placement,
            amount: prize.owed_amount.to_string(),
            status: prize.status.as_str(),
            transfer: prize.transfer_id.as_deref().unwrap_or_default(),
            retry: prize.auto_retry_eligible,
            reason: prize.failure_reason.as_deref().unwrap_or_default(),
        }
    }
}

/// Writes prize records as CSV.
pub struct PrizeReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> PrizeReportWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_prizes<'a>(
        &mut self,
        prizes: impl IntoIterator<Item = &'a PrizeRecord>,
    ) -> Result<(), AppError> {
        for prize in prizes {
            self.writer.serialize(PrizeRow::from(prize))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
