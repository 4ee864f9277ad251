//! Record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tm_core::Snapshot;

/// One persisted channel value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub time: DateTime<Utc>,
    /// Seconds since the sampler started.
    pub elapsed_s: f64,
    pub device: String,
    pub channel: String,
    pub value_k: f64,
}

impl HistoryRecord {
    /// Records for every successful reading; failure markers are skipped.
    pub fn from_snapshot(snapshot: &Snapshot) -> Vec<Self> {
        snapshot
            .readings()
            .filter_map(|(device, reading)| {
                reading.kelvin().map(|value_k| Self {
                    time: snapshot.time,
                    elapsed_s: snapshot.elapsed_s,
                    device: device.to_string(),
                    channel: reading.channel.clone(),
                    value_k,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tm_core::{ChannelReading, DeviceReadings, FailureReason, k};

    #[test]
    fn failed_channels_produce_no_record() {
        let t1 = Utc::now();
        let snap = Snapshot {
            tick: 1,
            time: t1,
            elapsed_s: 2.0,
            devices: vec![DeviceReadings {
                device: "D".to_string(),
                channels: vec![
                    ChannelReading::ok("c1", k(10.0), t1),
                    ChannelReading::failed("c2", FailureReason::Timeout, t1),
                ],
            }],
        };
        let records = HistoryRecord::from_snapshot(&snap);
        assert_eq!(
            records,
            vec![HistoryRecord {
                time: t1,
                elapsed_s: 2.0,
                device: "D".to_string(),
                channel: "c1".to_string(),
                value_k: 10.0,
            }]
        );
    }
}
