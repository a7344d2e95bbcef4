pub mod inference_client;
pub mod sleeper;

pub use inference_client::ChatCompletionsClient;
pub use sleeper::TokioSleeper;
