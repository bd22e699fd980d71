fn main() {
    cinder::main();
}
