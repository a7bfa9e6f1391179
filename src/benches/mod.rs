//! Case matrices for the two benchmark families.


use crate::harness::ExecutionMode;

/// `prefix.part.part` with `.parallel` appended for pooled runs.
fn case_name(parts: &[&str], mode: ExecutionMode) -> String {
    let mut name = parts.join(".");
    if let ExecutionMode::Parallel { .. } = mode {
        name.push_str(".parallel");
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_name_marks_parallel() {
        assert_eq!(
            case_name(&["json", "simd", "small"], ExecutionMode::Sequential),
            "json.simd.small"
        );
        assert_eq!(
            case_name(&["json", "simd", "small"], ExecutionMode::Parallel { workers: 4 }),
            "json.simd.small.parallel"
        );
    }
}
