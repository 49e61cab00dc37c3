mod common;

mod signature_tests;
