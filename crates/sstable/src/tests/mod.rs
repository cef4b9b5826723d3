mod helpers;

mod comparator_tests;
mod filter_tests;
mod merge_tests;
