//! Native error-code mapping and error display formats.

use hetra::error::{describe_cuda_error, describe_hip_error};
use hetra::prelude::*;

#[test]
fn known_cuda_codes_map_to_messages() {
    assert_eq!(describe_cuda_error(0), "success");
    assert_eq!(describe_cuda_error(2), "out of memory");
    assert_eq!(describe_cuda_error(100), "no CUDA-capable device detected");
    assert_eq!(describe_cuda_error(700), "illegal address during kernel execution");
}

#[test]
fn known_hip_codes_map_to_messages() {
    assert_eq!(describe_hip_error(0), "success");
    assert_eq!(describe_hip_error(2), "out of memory");
    assert_eq!(describe_hip_error(704), "peer access already enabled");
}

#[test]
fn mapping_is_total_over_arbitrary_codes() {
    // No code value may panic or produce an empty message.
    for code in [-1, i32::MIN, i32::MAX, 12345, 404] {
        assert!(!describe_cuda_error(code).is_empty());
        assert!(!describe_hip_error(code).is_empty());
    }
    assert_eq!(describe_cuda_error(12345), "unknown CUDA error 12345");
    assert_eq!(describe_hip_error(-3), "unknown HIP error -3");
}

#[test]
fn native_error_display_carries_backend_code_and_message() {
    let err = Error::native(Backend::Cuda, 2);
    let text = err.to_string();
    assert!(text.contains("cuda"));
    assert!(text.contains('2'));
    assert!(text.contains("out of memory"));
}

#[test]
fn typed_errors_render_their_context() {
    let disposed = Error::Disposed("accelerator");
    assert_eq!(disposed.to_string(), "accelerator has been disposed");

    let mismatch = Error::BackendMismatch {
        lhs: Backend::Cuda,
        rhs: Backend::Hip,
    };
    assert_eq!(mismatch.to_string(), "Backend mismatch: cuda vs hip");

    let range = Error::DeviceOutOfRange {
        backend: Backend::Hip,
        index: 4,
        count: 1,
    };
    assert!(range.to_string().contains("index 4"));
    assert!(range.to_string().contains("1 device(s)"));
}
