//! Concrete adapters, one per backend.

mod bland;
mod bolna;
mod custom;
mod elevenlabs;
mod exotel;
mod knowlarity;
mod ozonetel;
mod plivo;
mod tata;
mod vapi;

pub use bland::BlandAdapter;
pub use bolna::BolnaAdapter;
pub use custom::CustomAdapter;
pub use elevenlabs::ElevenLabsAdapter;
pub use exotel::ExotelAdapter;
pub use knowlarity::KnowlarityAdapter;
pub use ozonetel::OzonetelAdapter;
pub use plivo::PlivoAdapter;
pub use tata::TataAdapter;
pub use vapi::VapiAdapter;
