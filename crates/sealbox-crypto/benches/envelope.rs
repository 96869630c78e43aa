use sealbox_crypto::{decrypt, encrypt, FileKey};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_encrypt(bencher: divan::Bencher, size: usize) {
    let file_key = FileKey::generate().unwrap();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| encrypt(divan::black_box(&data), divan::black_box(file_key.as_bytes())).unwrap());
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_decrypt(bencher: divan::Bencher, size: usize) {
    let file_key = FileKey::generate().unwrap();
    let data = make_data(size);
    let sealed = encrypt(&data, file_key.as_bytes()).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| decrypt(divan::black_box(&sealed), divan::black_box(file_key.as_bytes())).unwrap());
}

fn main() {
    divan::main();
}
