pub mod background_check;
