mod controller;
mod repl;
mod sample;
