//! Metric decoding: ExportMetricsServiceRequest into canonical points.
//!
//! Gauges and sums map 1:1 to points. Histograms and summaries are
//! decomposed into `_sum` and `_count` points sharing the original labels;
//! histogram points additionally carry the reserved `le="+Inf"` label.
//! Exponential histograms are not supported and are counted as skipped.

use crate::otlp::common::{attrs_to_map, resource_service_name};
use crate::types::{AttrMap, MetricPoint, MetricType};
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::metrics::v1::{metric::Data, number_data_point, NumberDataPoint};

/// Data points that could not be decoded into canonical points.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SkippedMetrics {
    pub exponential_histograms: usize,
    pub missing_values: usize,
    pub nan_values: usize,
}

impl SkippedMetrics {
    pub fn has_skipped(&self) -> bool {
        self.total() > 0
    }

    pub fn total(&self) -> usize {
        self.exponential_histograms + self.missing_values + self.nan_values
    }
}

/// Result of decoding one metrics request.
#[derive(Debug, Default)]
pub struct MetricBatch {
    pub points: Vec<MetricPoint>,
    pub skipped: SkippedMetrics,
}

/// Decode every data point in the request.
pub fn decode_metrics(request: ExportMetricsServiceRequest) -> MetricBatch {
    let mut batch = MetricBatch::default();

    for resource_metrics in request.resource_metrics {
        let service_name = resource_service_name(resource_metrics.resource.as_ref());

        for scope_metrics in resource_metrics.scope_metrics {
            for metric in scope_metrics.metrics {
                let Some(data) = metric.data else {
                    continue;
                };

                match data {
                    Data::Gauge(gauge) => {
                        for point in gauge.data_points {
                            push_number_point(
                                &mut batch,
                                &metric.name,
                                &metric.unit,
                                MetricType::Gauge,
                                &service_name,
                                point,
                            );
                        }
                    }
                    // Temporality is the producer's declaration; the value is
                    // taken as reported and treated as a cumulative-point sample.
                    Data::Sum(sum) => {
                        for point in sum.data_points {
                            push_number_point(
                                &mut batch,
                                &metric.name,
                                &metric.unit,
                                MetricType::Counter,
                                &service_name,
                                point,
                            );
                        }
                    }
                    Data::Histogram(histogram) => {
                        for point in histogram.data_points {
                            let mut labels = attrs_to_map(&point.attributes);
                            labels.insert("le".to_string(), "+Inf".to_string());
                            push_aggregate_points(
                                &mut batch,
                                &metric.name,
                                &metric.unit,
                                MetricType::Histogram,
                                &service_name,
                                point.time_unix_nano,
                                point.sum.unwrap_or(0.0),
                                point.count,
                                labels,
                            );
                        }
                    }
                    Data::Summary(summary) => {
                        for point in summary.data_points {
                            let labels = attrs_to_map(&point.attributes);
                            push_aggregate_points(
                                &mut batch,
                                &metric.name,
                                &metric.unit,
                                MetricType::Summary,
                                &service_name,
                                point.time_unix_nano,
                                point.sum,
                                point.count,
                                labels,
                            );
                        }
                    }
                    Data::ExponentialHistogram(histogram) => {
                        batch.skipped.exponential_histograms += histogram.data_points.len();
                    }
                }
            }
        }
    }

    batch
}

fn push_number_point(
    batch: &mut MetricBatch,
    name: &str,
    unit: &str,
    metric_type: MetricType,
    service_name: &str,
    point: NumberDataPoint,
) {
    let value = match point.value {
        Some(number_data_point::Value::AsDouble(v)) => v,
        Some(number_data_point::Value::AsInt(v)) => v as f64,
        None => {
            batch.skipped.missing_values += 1;
            return;
        }
    };

    if value.is_nan() {
        batch.skipped.nan_values += 1;
        return;
    }

    batch.points.push(MetricPoint {
        name: name.to_string(),
        metric_type,
        unit: unit.to_string(),
        ts: point.time_unix_nano,
        value,
        service_name: service_name.to_string(),
        labels: attrs_to_map(&point.attributes),
    });
}

#[allow(clippy::too_many_arguments)]
fn push_aggregate_points(
    batch: &mut MetricBatch,
    name: &str,
    unit: &str,
    metric_type: MetricType,
    service_name: &str,
    ts: u64,
    sum: f64,
    count: u64,
    labels: AttrMap,
) {
    batch.points.push(MetricPoint {
        name: format!("{}_sum", name),
        metric_type,
        unit: unit.to_string(),
        ts,
        value: sum,
        service_name: service_name.to_string(),
        labels: labels.clone(),
    });
    batch.points.push(MetricPoint {
        name: format!("{}_count", name),
        metric_type,
        unit: unit.to_string(),
        ts,
        value: count as f64,
        service_name: service_name.to_string(),
        labels,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_proto::tonic::metrics::v1::{
        Gauge, Histogram, HistogramDataPoint, Metric, ResourceMetrics, ScopeMetrics, Sum,
    };

    fn request_with_metric(metric: Metric) -> ExportMetricsServiceRequest {
        ExportMetricsServiceRequest {
            resource_metrics: vec![ResourceMetrics {
                resource: None,
                scope_metrics: vec![ScopeMetrics {
                    metrics: vec![metric],
                    ..Default::default()
                }],
                ..Default::default()
            }],
        }
    }

    fn number_point(value: f64, ts: u64) -> NumberDataPoint {
        NumberDataPoint {
            time_unix_nano: ts,
            value: Some(number_data_point::Value::AsDouble(value)),
            ..Default::default()
        }
    }

    #[test]
    fn test_gauge_decodes_to_point() {
        let metric = Metric {
            name: "system.cpu.utilization".to_string(),
            unit: "1".to_string(),
            data: Some(Data::Gauge(Gauge {
                data_points: vec![number_point(0.42, 7)],
            })),
            ..Default::default()
        };

        let batch = decode_metrics(request_with_metric(metric));
        assert_eq!(batch.points.len(), 1);
        let point = &batch.points[0];
        assert_eq!(point.metric_type, MetricType::Gauge);
        assert_eq!(point.value, 0.42);
        assert_eq!(point.ts, 7);
    }

    #[test]
    fn test_sum_decodes_to_counter() {
        let metric = Metric {
            name: "http.requests".to_string(),
            data: Some(Data::Sum(Sum {
                data_points: vec![NumberDataPoint {
                    value: Some(number_data_point::Value::AsInt(10)),
                    ..Default::default()
                }],
                aggregation_temporality: 2,
                is_monotonic: true,
            })),
            ..Default::default()
        };

        let batch = decode_metrics(request_with_metric(metric));
        assert_eq!(batch.points[0].metric_type, MetricType::Counter);
        assert_eq!(batch.points[0].value, 10.0);
    }

    #[test]
    fn test_histogram_produces_sum_and_count_rows() {
        let metric = Metric {
            name: "http.duration".to_string(),
            data: Some(Data::Histogram(Histogram {
                data_points: vec![HistogramDataPoint {
                    time_unix_nano: 99,
                    count: 4,
                    sum: Some(12.5),
                    bucket_counts: vec![1, 3],
                    explicit_bounds: vec![0.5],
                    ..Default::default()
                }],
                aggregation_temporality: 2,
            })),
            ..Default::default()
        };

        let batch = decode_metrics(request_with_metric(metric));
        assert_eq!(batch.points.len(), 2);

        let sum = &batch.points[0];
        assert_eq!(sum.name, "http.duration_sum");
        assert_eq!(sum.value, 12.5);
        assert_eq!(sum.ts, 99);
        assert_eq!(sum.labels.get("le").unwrap(), "+Inf");

        let count = &batch.points[1];
        assert_eq!(count.name, "http.duration_count");
        assert_eq!(count.value, 4.0);
        assert_eq!(count.ts, 99);
        assert_eq!(count.labels, sum.labels);
    }

    #[test]
    fn test_missing_value_skipped() {
        let metric = Metric {
            name: "m".to_string(),
            data: Some(Data::Gauge(Gauge {
                data_points: vec![NumberDataPoint::default()],
            })),
            ..Default::default()
        };

        let batch = decode_metrics(request_with_metric(metric));
        assert!(batch.points.is_empty());
        assert_eq!(batch.skipped.missing_values, 1);
        assert!(batch.skipped.has_skipped());
    }

    #[test]
    fn test_nan_value_skipped() {
        let metric = Metric {
            name: "m".to_string(),
            data: Some(Data::Gauge(Gauge {
                data_points: vec![number_point(f64::NAN, 0)],
            })),
            ..Default::default()
        };

        let batch = decode_metrics(request_with_metric(metric));
        assert!(batch.points.is_empty());
        assert_eq!(batch.skipped.nan_values, 1);
    }

    #[test]
    fn test_empty_request() {
        let batch = decode_metrics(ExportMetricsServiceRequest::default());
        assert!(batch.points.is_empty());
        assert!(!batch.skipped.has_skipped());
    }
}
