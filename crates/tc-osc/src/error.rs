use thiserror::Error;

/// Errors originating from the OSC module.
#[derive(Error, Debug)]
pub enum OscError {
    /// A float payload is NaN or infinite under the `Drop` policy.
    #[error("Valeur non finie sur {address}, tick abandonné")]
    NonFinite {
        /// Address of the first offending feature.
        address: String,
    },

    /// A single message cannot fit in one datagram, even alone.
    #[error("Message {address} trop grand : {bytes} octets (max {limit})")]
    MessageTooLarge {
        /// Feature address.
        address: String,
        /// Size of the one-message bundle.
        bytes: usize,
        /// Datagram limit.
        limit: usize,
    },

    /// Byte budget outside the usable range.
    #[error("Budget de paquet invalide : {0} octets")]
    InvalidBudget(usize),

    /// Bytes that do not parse as an OSC packet.
    #[error("Paquet OSC malformé : {0}")]
    Malformed(String),

    /// Destination host did not resolve.
    #[error("Résolution de {host}:{port} impossible : {reason}")]
    Resolve {
        /// Host as configured.
        host: String,
        /// UDP port.
        port: u16,
        /// Underlying cause.
        reason: String,
    },

    /// Socket setup error.
    #[error("Erreur socket : {0}")]
    Io(#[from] std::io::Error),
}
