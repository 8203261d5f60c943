//! Benchmark comparing the protomodel executors against prost for encode/decode.

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use protomodel::{
    Describe, Executor, LengthStrategy, ReadOptions, Reflect, TypeModel, WriteOptions,
};

mod prost_types {
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct PhoneNumber {
        #[prost(string, tag = "1")]
        pub number: String,
        #[prost(int32, tag = "2")]
        pub phone_type: i32,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Person {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(int32, tag = "2")]
        pub id: i32,
        #[prost(string, tag = "3")]
        pub email: String,
        #[prost(message, repeated, tag = "4")]
        pub phones: Vec<PhoneNumber>,
    }
}

#[derive(Clone, Default, PartialEq, Describe)]
struct PhoneNumber {
    #[proto(tag = 1)]
    number: String,
    #[proto(tag = 2)]
    phone_type: i32,
}

#[derive(Clone, Default, PartialEq, Describe)]
struct Person {
    #[proto(tag = 1)]
    name: String,
    #[proto(tag = 2)]
    id: i32,
    #[proto(tag = 3)]
    email: String,
    #[proto(tag = 4, repeated)]
    phones: Vec<PhoneNumber>,
}

fn create_prost_person(num_phones: usize) -> prost_types::Person {
    prost_types::Person {
        name: "Alice Johnson".to_string(),
        id: 12345,
        email: "alice.johnson@example.com".to_string(),
        phones: (0..num_phones)
            .map(|i| prost_types::PhoneNumber {
                number: format!("555-{:04}", i),
                phone_type: i32::try_from(i % 3).unwrap(),
            })
            .collect(),
    }
}

fn create_person(num_phones: usize) -> Person {
    Person {
        name: "Alice Johnson".to_string(),
        id: 12345,
        email: "alice.johnson@example.com".to_string(),
        phones: (0..num_phones)
            .map(|i| PhoneNumber {
                number: format!("555-{:04}", i),
                phone_type: i32::try_from(i % 3).unwrap(),
            })
            .collect(),
    }
}

const EXECUTORS: [(&str, Executor); 2] = [
    ("interpreter", Executor::Interpreter),
    ("specialized", Executor::Specialized),
];

fn encode_benchmark(c: &mut Criterion) {
    use prost::Message as _;

    let model = TypeModel::new();
    model.describe::<Person>().unwrap();
    model.specialize_all().unwrap();
    let mut group = c.benchmark_group("encode");

    for num_phones in [0, 1, 10, 100] {
        let prost_person = create_prost_person(num_phones);
        let msg = create_person(num_phones).to_message(&model).unwrap();

        let encoded_size = prost_person.encoded_len();
        group.throughput(Throughput::Bytes(u64::try_from(encoded_size).unwrap()));

        group.bench_with_input(
            BenchmarkId::new("prost", num_phones),
            &prost_person,
            |b, person| {
                b.iter(|| {
                    let mut buf = Vec::with_capacity(person.encoded_len());
                    person.encode(&mut buf).unwrap();
                    std::hint::black_box(buf)
                })
            },
        );

        for (name, executor) in EXECUTORS {
            let options = WriteOptions::new().executor(executor);
            group.bench_with_input(BenchmarkId::new(name, num_phones), &msg, |b, msg| {
                b.iter(|| {
                    let mut buf = Vec::with_capacity(encoded_size);
                    model.serialize_with(msg, &mut buf, &options).unwrap();
                    std::hint::black_box(buf)
                })
            });
        }
    }

    group.finish();
}

fn decode_benchmark(c: &mut Criterion) {
    use prost::Message as _;

    let model = TypeModel::new();
    let person = model.describe::<Person>().unwrap();
    model.specialize_all().unwrap();
    let mut group = c.benchmark_group("decode");

    for num_phones in [0, 1, 10, 100] {
        // Encode with prost to get wire-compatible bytes
        let mut encoded = Vec::new();
        create_prost_person(num_phones).encode(&mut encoded).unwrap();
        let encoded_bytes = Bytes::from(encoded.clone());

        group.throughput(Throughput::Bytes(u64::try_from(encoded.len()).unwrap()));

        group.bench_with_input(
            BenchmarkId::new("prost", num_phones),
            &encoded,
            |b, data| {
                b.iter(|| {
                    let person = prost_types::Person::decode(&data[..]).unwrap();
                    std::hint::black_box(person)
                })
            },
        );

        for (name, executor) in EXECUTORS {
            let options = ReadOptions::new().executor(executor);
            group.bench_with_input(
                BenchmarkId::new(name, num_phones),
                &encoded_bytes,
                |b, data| {
                    b.iter(|| {
                        let msg = model.deserialize_with(person, data.clone(), &options).unwrap();
                        std::hint::black_box(msg)
                    })
                },
            );
        }

        group.bench_with_input(
            BenchmarkId::new("derived", num_phones),
            &encoded_bytes,
            |b, data| {
                b.iter(|| {
                    let person: Person = model.deserialize_value(data.clone()).unwrap();
                    std::hint::black_box(person)
                })
            },
        );
    }

    group.finish();
}

fn framing_benchmark(c: &mut Criterion) {
    let model = TypeModel::new();
    let mut group = c.benchmark_group("framing");

    for num_phones in [1, 10, 100] {
        let msg = create_person(num_phones).to_message(&model).unwrap();
        for (name, strategy) in [
            ("measure", LengthStrategy::Measure),
            ("buffer", LengthStrategy::Buffer),
        ] {
            let options = WriteOptions::new().length_strategy(strategy);
            group.bench_with_input(BenchmarkId::new(name, num_phones), &msg, |b, msg| {
                b.iter(|| {
                    let mut buf = Vec::new();
                    model.serialize_with(msg, &mut buf, &options).unwrap();
                    std::hint::black_box(buf)
                })
            });
        }
    }

    group.finish();
}

criterion_group!(benches, encode_benchmark, decode_benchmark, framing_benchmark);
criterion_main!(benches);
