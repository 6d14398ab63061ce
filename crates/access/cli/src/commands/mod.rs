use clap::Subcommand;

mod keys;
mod loopback;

pub(crate) use keys::{derive_keys_command, mrz_seed_command};
pub(crate) use loopback::loopback_command;

use crate::{SchemeArg, TransportArg};

/// Subcommands of the CLI
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run a reader and a credential against each other in this process
    Loopback {
        /// Scheme to authenticate with (defaults to the configured scheme)
        #[arg(long, value_enum)]
        scheme: Option<SchemeArg>,

        /// Link between the two roles
        #[arg(long, value_enum, default_value_t = TransportArg::Block)]
        transport: TransportArg,
    },

    /// Derive the static badge keys for one credential
    DeriveKeys {
        /// ADF read (master) key in hex
        #[arg(long, required = true)]
        read_key: String,

        /// ADF object identifier in hex (defaults to the access-control ADF)
        #[arg(long)]
        object_id: Option<String>,

        /// Credential diversifier in hex
        #[arg(long, required = true)]
        diversifier: String,

        /// Key slot
        #[arg(long, default_value_t = 1)]
        key_no: u8,

        /// Cipher the keys are used with
        #[arg(long, value_enum, default_value_t = CipherArg::Aes128)]
        cipher: CipherArg,
    },

    /// Compute the BAC key seed and document keys from MRZ fields
    MrzSeed {
        /// Document number
        #[arg(required = true)]
        document_number: String,

        /// Date of birth (YYMMDD)
        #[arg(required = true)]
        date_of_birth: String,

        /// Date of expiry (YYMMDD)
        #[arg(required = true)]
        date_of_expiry: String,
    },
}

/// Block cipher selectable on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum CipherArg {
    /// Two-key triple DES
    #[value(name = "3des")]
    TripleDes,
    /// AES-128
    Aes128,
}
