/*!
# TimeClock DevKit - Test doubles for the scan engine

Library for developing and testing the scanner without hardware or backend:
- Mock camera recording every stream open and release
- Scripted attendance backend
- In-memory HTTP attendance service
- Harness driving a real scan controller
*/

pub mod fake_server;
pub mod mock_backend;
pub mod mock_camera;
pub mod test_utils;

pub use fake_server::FakeAttendanceServer;
pub use mock_backend::{MockBackend, RecordedScan};
pub use mock_camera::MockCamera;
pub use test_utils::TestHarness;
