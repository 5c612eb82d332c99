use snafu::Snafu;

/// A metric error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum MetricError {
    /// An invalid configuration was given when creating an instrument.
    #[snafu(display("invalid configuration: {}", reason))]
    InvalidConfiguration {
        /// Cause of the invalid configuration.
        reason: &'static str,
    },

    /// An observed value cannot be aggregated by the instrument it was given to.
    #[snafu(display("invalid observation: value {} cannot be recorded", value))]
    InvalidObservation {
        /// The rejected value.
        value: f64,
    },
}
