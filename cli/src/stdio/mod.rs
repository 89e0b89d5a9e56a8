mod input;

pub use input::Prompter;
