pub mod cart;
pub mod currency;
pub mod fee;
pub mod fingerprint;
pub mod listing;
pub mod promotion;
pub mod seller;
pub mod settings;
pub mod settlement;
