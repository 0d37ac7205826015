use crate::model::FlightOffer;
use crate::scheduler::TaskReport;
use crate::storage::traits::{OfferSink, StorageError, StorageResult};
use crate::storage::RunStatus;

/// Writes to every configured sink
///
/// A failing sink is logged and skipped. A call only fails when every sink
/// failed, in which case the last error is returned.
pub struct FanoutSink {
    sinks: Vec<Box<dyn OfferSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Box<dyn OfferSink>>) -> Self {
        Self { sinks }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    fn each<T>(
        &mut self,
        action: &str,
        mut op: impl FnMut(&mut dyn OfferSink) -> StorageResult<T>,
    ) -> StorageResult<Vec<T>> {
        let mut results = Vec::with_capacity(self.sinks.len());
        let mut last_error: Option<StorageError> = None;

        for sink in &mut self.sinks {
            match op(sink.as_mut()) {
                Ok(value) => results.push(value),
                Err(e) => {
                    tracing::error!("{} sink failed to {}: {}", sink.name(), action, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if results.is_empty() => Err(e),
            _ => Ok(results),
        }
    }
}

impl OfferSink for FanoutSink {
    fn name(&self) -> &str {
        "fanout"
    }

    fn save_offers(&mut self, offers: &[FlightOffer], name: &str) -> StorageResult<usize> {
        let saved = self.each("save offers", |sink| sink.save_offers(offers, name))?;
        Ok(saved.into_iter().max().unwrap_or(0))
    }

    fn record_task(&mut self, report: &TaskReport) -> StorageResult<()> {
        self.each("record task", |sink| sink.record_task(report))
            .map(|_| ())
    }

    fn begin_run(&mut self, config_hash: &str) -> StorageResult<()> {
        self.each("begin run", |sink| sink.begin_run(config_hash))
            .map(|_| ())
    }

    fn finish_run(&mut self, status: RunStatus) -> StorageResult<()> {
        self.each("finish run", |sink| sink.finish_run(status))
            .map(|_| ())
    }
}
