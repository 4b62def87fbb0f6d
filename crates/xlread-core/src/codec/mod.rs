//! Delta/absolute sample stream decoding.
//!
//! Each packet is an event byte, an optional frequency byte (only when some
//! channel is subsampled), a per-channel width mask, one 1- or 2-byte delta
//! per active channel, then one 32-bit absolute value for every channel whose
//! delta slot held the `0xFFFF` sentinel. Deltas are added to the channel's
//! last absolute value after scaling by its calibration factor.
//!
//! Constants live in `layout`, per-recording channel setup in `config`, byte
//! conventions in `reader`, and the decode loop in `parser`.
//!
//! Version française (résumé):
//! Le flux d'échantillons est décodé paquet par paquet : octet d'événement,
//! octet de fréquence optionnel, masque de largeur, deltas puis valeurs
//! absolues après la sentinelle `0xFFFF`. Les canaux court-circuités ne
//! sont jamais lus.

pub mod config;
pub mod layout;
pub mod parser;
pub mod reader;

pub use config::ChannelLayout;
pub use parser::{Packet, PacketStream, decode_packets};
