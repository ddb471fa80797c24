pub mod ethereum;
pub mod mock_custody;
pub mod mock_directory;
pub mod mock_executor;
pub mod mock_settlement;
