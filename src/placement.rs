/// 均衡轮转放置
///
/// createRDD 和两类shuffle的join阶段共用同一套份额算术：
/// `rest = P mod W`，`eachCount = (P - rest) / W`，编号 `i < rest` 的
/// worker多拿一个分区。输出列表按worker编号顺序排布，份额为零的
/// worker由调用方跳过。

/// 每个worker分到的分区数，按worker编号顺序
pub fn shares(num_partitions: usize, worker_count: usize) -> Vec<usize> {
    if worker_count == 0 {
        return Vec::new();
    }
    let rest = num_partitions % worker_count;
    let each = (num_partitions - rest) / worker_count;
    (0..worker_count)
        .map(|i| each + usize::from(i < rest))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balanced_split() {
        // P=5, W=2: rest=1, each=2 → [3, 2]
        assert_eq!(shares(5, 2), vec![3, 2]);
    }

    #[test]
    fn test_exact_division() {
        assert_eq!(shares(6, 3), vec![2, 2, 2]);
    }

    #[test]
    fn test_fewer_partitions_than_workers() {
        // 尾部worker份额为零，由调用方跳过
        assert_eq!(shares(2, 4), vec![1, 1, 0, 0]);
    }

    #[test]
    fn test_zero_partitions() {
        assert_eq!(shares(0, 3), vec![0, 0, 0]);
    }

    #[test]
    fn test_shares_sum_to_total() {
        for p in 0..40 {
            for w in 1..10 {
                let s = shares(p, w);
                assert_eq!(s.iter().sum::<usize>(), p, "P={} W={}", p, w);
                // 份额单调不增，差值最多为1
                for pair in s.windows(2) {
                    assert!(pair[0] >= pair[1]);
                    assert!(pair[0] - pair[1] <= 1);
                }
            }
        }
    }
}
