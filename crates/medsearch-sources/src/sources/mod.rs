//! Source adapters.

pub mod chembl;
pub mod drugbank;
pub mod ema;
pub mod mhra;
pub mod openfda;
pub mod pubmed;
pub mod rxnav;
pub mod tga;

pub use chembl::ChemblMolecules;
pub use drugbank::DrugBankDrugs;
pub use ema::EmaMedicines;
pub use mhra::MhraProducts;
pub use openfda::OpenFdaLabels;
pub use pubmed::{PubMedApi, PubMedBrowser};
pub use rxnav::RxNavDrugs;
pub use tga::TgaCmiSearch;
