pub use app::App;
#[cfg(test)]
pub use app::router;

mod app;
mod protected;
mod public;
mod view;
