pub mod prize_writer;
